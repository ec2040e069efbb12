//! 消息代理抽象
//!
//! 分发器只依赖这里的 trait，具体代理（进程内 / Redis 列表）可以互换。

mod in_memory;
mod redis_list;

pub use in_memory::{InMemoryBroker, PendingJob};
pub use redis_list::RedisBroker;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskq_core::config::{BrokerConfig, BrokerKind};
use taskq_core::models::Priority;
use taskq_core::TaskqResult;

/// 代理分配的作业句柄
pub type JobHandle = String;

/// 代理返回码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Success,
    WorkData,
    WorkStatus { numerator: u32, denominator: u32 },
    WorkException,
    WorkFail,
    Timeout,
    Other(i32),
}

impl ReturnCode {
    /// 是否为中间事件（数据或进度）
    pub fn is_intermediate(self) -> bool {
        matches!(self, ReturnCode::WorkData | ReturnCode::WorkStatus { .. })
    }
}

/// 同步调用过程中收到的一条回复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerReply {
    pub code: ReturnCode,
    pub data: Vec<u8>,
}

impl BrokerReply {
    pub fn new(code: ReturnCode, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub fn empty(code: ReturnCode) -> Self {
        Self::new(code, Vec::new())
    }
}

/// 作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub known: bool,
    pub running: bool,
    pub numerator: u32,
    pub denominator: u32,
}

/// 生产者侧的代理客户端
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// 存活探测
    async fn ping(&self) -> TaskqResult<bool>;

    /// 同步调用，返回逐条读取回复的流
    async fn call_sync(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<Box<dyn ReplyStream>>;

    /// 异步投递，代理确认接收后即返回作业句柄
    async fn call_async(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<JobHandle>;

    async fn job_status(&self, handle: &str) -> TaskqResult<JobStatus>;
}

/// 同步调用的回复流
#[async_trait]
pub trait ReplyStream: Send {
    /// 等待下一条回复，超时返回 `ReturnCode::Timeout`
    async fn next_reply(&mut self) -> TaskqResult<BrokerReply>;
}

/// 消费者侧的代理连接
#[async_trait]
pub trait BrokerWorker: Send {
    async fn ping(&self) -> TaskqResult<bool>;

    fn register(&mut self, task: &str);

    fn registered(&self) -> Vec<String>;

    /// 按优先级领取一个已注册任务的作业，超时返回 `None`
    async fn grab_job(&mut self, timeout: Duration) -> TaskqResult<Option<Box<dyn BrokerJob>>>;
}

/// worker 领取到的作业
#[async_trait]
pub trait BrokerJob: Send {
    fn handle(&self) -> &str;

    fn unique(&self) -> &str;

    fn function_name(&self) -> &str;

    fn workload(&self) -> &[u8];

    fn priority(&self) -> Priority;

    fn set_return(&mut self, code: ReturnCode);

    fn return_code(&self) -> ReturnCode;

    async fn send_data(&mut self, data: Vec<u8>) -> TaskqResult<()>;

    async fn send_status(&mut self, numerator: u32, denominator: u32) -> TaskqResult<()>;

    async fn send_complete(&mut self, result: Vec<u8>) -> TaskqResult<()>;

    async fn send_exception(&mut self, data: Vec<u8>) -> TaskqResult<()>;

    async fn send_fail(&mut self) -> TaskqResult<()>;

    /// 交还作业，代理会重新投递给后续 worker
    async fn release(&mut self) -> TaskqResult<()>;
}

/// 代理连接工厂，分发器和 worker 通过它懒加载连接
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect_client(&self, config: &BrokerConfig) -> TaskqResult<Arc<dyn BrokerClient>>;

    async fn connect_worker(&self, config: &BrokerConfig) -> TaskqResult<Box<dyn BrokerWorker>>;
}

/// Redis 代理连接工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisBrokerConnector;

#[async_trait]
impl BrokerConnector for RedisBrokerConnector {
    async fn connect_client(&self, config: &BrokerConfig) -> TaskqResult<Arc<dyn BrokerClient>> {
        Ok(Arc::new(RedisBroker::connect(config).await?))
    }

    async fn connect_worker(&self, config: &BrokerConfig) -> TaskqResult<Box<dyn BrokerWorker>> {
        Ok(Box::new(RedisBroker::connect(config).await?.into_worker()))
    }
}

/// 按配置选择代理实现
pub fn connector_for(config: &BrokerConfig) -> Arc<dyn BrokerConnector> {
    match config.kind {
        BrokerKind::Memory => Arc::new(InMemoryBroker::new()),
        BrokerKind::Redis => Arc::new(RedisBrokerConnector),
    }
}
