pub mod broker;
pub mod redis_support;
pub mod sequence;

pub use broker::{
    connector_for, BrokerClient, BrokerConnector, BrokerJob, BrokerReply, BrokerWorker,
    InMemoryBroker, JobHandle, JobStatus, PendingJob, RedisBroker, RedisBrokerConnector,
    ReplyStream, ReturnCode,
};
pub use sequence::{
    DebugTrace, KeyValueSequenceStore, MemorySequenceStore, RedisSequenceStore, SequenceStore,
    SequenceStoreFactory, SqlSequenceStore,
};
