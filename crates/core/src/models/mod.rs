pub mod driver;
pub mod envelope;
pub mod priority;
pub mod response;
pub mod sequence_record;
pub mod store_type;

pub use driver::SequenceDriver;
pub use envelope::{EnvelopeConfig, WorkloadEnvelope};
pub use priority::{Priority, PriorityCode};
pub use response::{DispatchError, DispatchResponse, ErrorCode, HolderKey};
pub use sequence_record::{
    format_sequence_date, parse_sequence_date, sequence_timestamp, NewSequenceRecord,
    SequenceRecord, SEQUENCE_DATE_FORMAT,
};
pub use store_type::{StoreType, StoreTypeCode};
