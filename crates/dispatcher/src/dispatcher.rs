use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use taskq_core::config::SequenceConfig;
use taskq_core::models::{
    DispatchError, DispatchResponse, ErrorCode, NewSequenceRecord, Priority, PriorityCode,
    StoreType, StoreTypeCode, WorkloadEnvelope,
};
use taskq_core::{
    AppConfig, ErrorNotifier, MessageLogger, Registry, TaskqError, TaskqResult, TracingNotifier,
};
use taskq_infrastructure::{
    connector_for, BrokerClient, BrokerConnector, JobStatus, ReturnCode,
    SequenceStoreFactory,
};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, instrument, warn};

use crate::holder::{HolderEntry, TaskHolder};
use crate::observer::{CallObserver, LoggingObserver};

/// 暂存器批量投递失败明细：任务名 -> 优先级 -> 错误列表
pub type HolderErrors = BTreeMap<String, BTreeMap<Priority, Vec<DispatchError>>>;

/// 任务分发会话
///
/// 每次提交在三种策略间选择：
/// - Direct：立即投递到消息代理
/// - Sequence：写入序列存储，由 drainer 稍后回放
/// - Holder：暂存在内存中，会话结束时按 (任务, 优先级) 分组批量投递
///
/// 代理连接在首次使用时建立并缓存，每次提交前做存活探测。
/// 会话不是线程安全的，需要并发时由调用方各自持有实例。
///
/// 一旦有 Holder 提交，会话结束前必须调用 [`Dispatcher::end_session`]，
/// 或者使用 [`Dispatcher::scoped`]；`Drop` 只是最后的兜底。
pub struct Dispatcher {
    config: Arc<AppConfig>,
    registry: Registry,
    connector: Arc<dyn BrokerConnector>,
    client: Option<Arc<dyn BrokerClient>>,
    sequence: Option<SequenceStoreFactory>,
    holder: Option<TaskHolder>,
    notifier: Arc<dyn ErrorNotifier>,
    logger: MessageLogger,
}

impl Dispatcher {
    pub fn new(config: AppConfig, registry: Registry, connector: Arc<dyn BrokerConnector>) -> Self {
        let sequence = config
            .sequence
            .clone()
            .filter(|_| config.is_sequence_available())
            .map(|sequence| SequenceStoreFactory::new(sequence, registry.clone()));
        let logger = MessageLogger::from_config(&config.logging);

        Self {
            config: Arc::new(config),
            registry,
            connector,
            client: None,
            sequence,
            holder: None,
            notifier: Arc::new(TracingNotifier),
            logger,
        }
    }

    /// 按配置构建：任务白名单来自配置，代理实现按 `broker.kind` 选择
    pub fn from_config(config: AppConfig) -> Self {
        let registry = Registry::from_config(&config);
        let connector = connector_for(&config.broker);
        Self::new(config, registry, connector)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_logger(mut self, logger: MessageLogger) -> Self {
        self.logger = logger;
        self
    }

    /// 替换序列存储工厂，用于与 drainer 共享同一个存储
    pub fn with_sequence_factory(mut self, factory: SequenceStoreFactory) -> Self {
        self.sequence = Some(factory);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sequence_factory(&self) -> Option<&SequenceStoreFactory> {
        self.sequence.as_ref()
    }

    pub fn is_sequence_available(&self) -> bool {
        self.sequence.is_some()
    }

    /// 当前生效的序列存储配置
    pub fn sequence_config(&self) -> Option<SequenceConfig> {
        self.sequence.as_ref().map(|factory| factory.config().clone())
    }

    /// 暂存器中尚未投递的条目数
    pub fn held_count(&self) -> usize {
        self.holder.as_ref().map_or(0, TaskHolder::len)
    }

    /// 建立（或复用）代理连接并做存活探测
    async fn init_connection(&mut self, skip_notify: bool) -> TaskqResult<Arc<dyn BrokerClient>> {
        let connected = match &self.client {
            Some(client) => Ok(client.clone()),
            None => self.connector.connect_client(&self.config.broker).await,
        };

        let outcome = match connected {
            Ok(client) => match client.ping().await {
                Ok(true) => Ok(client),
                Ok(false) => Err("Clients are not reachable.".to_string()),
                Err(e) => Err(format!("Clients are not reachable. {e}")),
            },
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(client) => {
                if self.client.is_none() {
                    debug!("已连接消息代理: {}", self.config.broker.servers_string());
                    self.client = Some(client.clone());
                }
                Ok(client)
            }
            Err(reason) => {
                let message = format!("Dispatcher ERROR: {reason}");
                self.logger.error(message.as_str());
                if !skip_notify {
                    self.notifier.notify(&message);
                }
                Err(TaskqError::ServerDown(message))
            }
        }
    }

    /// 同步提交，使用默认观察者
    pub async fn submit_foreground(
        &mut self,
        task: &str,
        params: Value,
        priority: impl Into<PriorityCode>,
    ) -> DispatchResponse {
        let mut observer = LoggingObserver;
        self.submit_foreground_with(task, params, priority, &mut observer)
            .await
    }

    /// 同步提交，阻塞直到代理返回终止码
    ///
    /// 数据和进度等中间事件逐条交给 `observer`。
    #[instrument(skip(self, params, priority, observer))]
    pub async fn submit_foreground_with(
        &mut self,
        task: &str,
        params: Value,
        priority: impl Into<PriorityCode>,
        observer: &mut dyn CallObserver,
    ) -> DispatchResponse {
        let priority = match priority.into().resolve() {
            Ok(priority) => priority,
            Err(reason) => return DispatchResponse::from_not_allowed(&reason),
        };
        if let Err(reason) = self.registry.check_task(task) {
            return DispatchResponse::from_not_allowed(&reason);
        }

        let client = match self.init_connection(false).await {
            Ok(client) => client,
            Err(e) => return server_down(task, &e),
        };

        match self
            .call_sync(client.as_ref(), task, params, priority, observer)
            .await
        {
            Ok(result) => DispatchResponse::with_result(result),
            Err(e) => DispatchResponse::failure(ErrorCode::BadException, e.to_string()),
        }
    }

    async fn call_sync(
        &self,
        client: &dyn BrokerClient,
        task: &str,
        params: Value,
        priority: Priority,
        observer: &mut dyn CallObserver,
    ) -> TaskqResult<Value> {
        let workload = WorkloadEnvelope::new(self.config.envelope_config(), params, false).encode()?;
        let mut stream = client.call_sync(task, workload, priority).await?;

        let last = loop {
            let reply = stream.next_reply().await?;
            if observer.on_reply(task, &reply) || reply.code == ReturnCode::Success {
                break reply;
            }
        };

        match last.code {
            ReturnCode::Success | ReturnCode::WorkData | ReturnCode::WorkStatus { .. } => {
                Ok(decode_result(&last.data))
            }
            other => Err(TaskqError::broker(format!("Bad return code {other:?}"))),
        }
    }

    /// 后台提交，按存储类型选择策略
    #[instrument(skip(self, params, priority, store_type))]
    pub async fn submit_background(
        &mut self,
        task: &str,
        params: Value,
        priority: impl Into<PriorityCode>,
        store_type: impl Into<StoreTypeCode>,
    ) -> DispatchResponse {
        let priority = match priority.into().resolve() {
            Ok(priority) => priority,
            Err(reason) => return DispatchResponse::from_not_allowed(&reason),
        };
        if let Err(reason) = self.registry.check_task(task) {
            return DispatchResponse::from_not_allowed(&reason);
        }
        let store_type = match store_type.into().resolve() {
            Ok(store_type) => store_type,
            Err(reason) => return DispatchResponse::from_not_allowed(&reason),
        };

        match store_type {
            StoreType::Direct => self.dispatch_direct(task, params, priority).await,
            StoreType::Sequence => self.dispatch_sequence(task, params, priority).await,
            StoreType::Holder => self.dispatch_holder(task, params, priority),
        }
    }

    pub async fn submit_background_direct(
        &mut self,
        task: &str,
        params: Value,
        priority: impl Into<PriorityCode>,
    ) -> DispatchResponse {
        self.submit_background(task, params, priority, StoreType::Direct)
            .await
    }

    pub async fn submit_background_sequence(
        &mut self,
        task: &str,
        params: Value,
        priority: impl Into<PriorityCode>,
    ) -> DispatchResponse {
        self.submit_background(task, params, priority, StoreType::Sequence)
            .await
    }

    pub async fn submit_background_holder(
        &mut self,
        task: &str,
        params: Value,
        priority: impl Into<PriorityCode>,
    ) -> DispatchResponse {
        self.submit_background(task, params, priority, StoreType::Holder)
            .await
    }

    async fn dispatch_direct(&mut self, task: &str, params: Value, priority: Priority) -> DispatchResponse {
        let client = match self.init_connection(false).await {
            Ok(client) => client,
            Err(e) => return server_down(task, &e),
        };

        let workload =
            match WorkloadEnvelope::new(self.config.envelope_config(), params, true).encode() {
                Ok(workload) => workload,
                Err(e) => return DispatchResponse::failure(ErrorCode::BadException, e.to_string()),
            };

        match client.call_async(task, workload, priority).await {
            Ok(handle) => {
                debug!("任务 {} 已投递，作业句柄 {}", task, handle);
                DispatchResponse::with_job_handle(handle)
            }
            Err(e) => DispatchResponse::failure(ErrorCode::BadException, e.to_string()),
        }
    }

    async fn dispatch_sequence(&mut self, task: &str, params: Value, priority: Priority) -> DispatchResponse {
        let Some(factory) = &self.sequence else {
            return DispatchResponse::failure(
                ErrorCode::NotAllowedStoreType,
                format!("Store type '{}' was not configured", StoreType::Sequence.code()),
            );
        };

        let mut store = match factory.create() {
            Ok(store) => store,
            Err(e) => {
                return DispatchResponse::failure(
                    ErrorCode::SequenceError,
                    format!("[TASK => {task}] We have problems with sequence storage. {e}"),
                )
            }
        };

        let record = NewSequenceRecord::new(task, params, priority, self.config.source());
        let stored = store.store(&record, None).await;
        if let Err(e) = store.close().await {
            warn!("关闭序列存储失败: {}", e);
        }

        match stored {
            Ok(key) => {
                debug!("任务 {} 已写入序列存储，记录 {}", task, key);
                DispatchResponse::with_store_key(key)
            }
            Err(e) => {
                let message = format!("[TASK => {task}] Unable store task into storage. {e}");
                self.logger.error(message.as_str());
                if e.is_connection_error() {
                    self.notifier.notify(&message);
                }
                DispatchResponse::failure(ErrorCode::SequenceError, message)
            }
        }
    }

    fn dispatch_holder(&mut self, task: &str, params: Value, priority: Priority) -> DispatchResponse {
        let holder = self.holder.get_or_insert_with(TaskHolder::new);
        match holder.attach(HolderEntry::new(task, params, priority)) {
            Ok(key) => DispatchResponse::with_holder_key(key),
            Err(e) => DispatchResponse::failure(ErrorCode::HolderError, e.to_string()),
        }
    }

    /// 把暂存器中的条目按 (任务, 优先级) 分组直接投递
    ///
    /// 暂存器在投递前被清空，失败的分组不会留在暂存器中，
    /// 只会出现在返回的错误明细里。
    pub async fn flush_holder(&mut self) -> Result<(), HolderErrors> {
        let groups = match self.holder.as_mut() {
            Some(holder) if !holder.is_empty() => holder.drain_groups(),
            _ => return Ok(()),
        };

        let mut errors = HolderErrors::new();
        for (task, by_priority) in groups {
            for (priority, params) in by_priority {
                let count = params.len();
                let response = self
                    .submit_background(&task, Value::Array(params), priority, StoreType::Direct)
                    .await;
                match response.error {
                    None => debug!("暂存任务 {} ({}) 已投递 {} 条", task, priority, count),
                    Some(error) => {
                        warn!("暂存任务 {} ({}) 投递失败: {}", task, priority, error);
                        errors
                            .entry(task.clone())
                            .or_default()
                            .entry(priority)
                            .or_default()
                            .push(error);
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// 结束会话：投递暂存器中的全部条目
    pub async fn end_session(&mut self) -> Result<(), HolderErrors> {
        let held = self.held_count();
        let outcome = self.flush_holder().await;
        match &outcome {
            Ok(()) if held > 0 => info!("会话结束，已投递 {} 条暂存任务", held),
            Ok(()) => {}
            Err(errors) => {
                let failed: usize = errors
                    .values()
                    .flat_map(|by_priority| by_priority.values())
                    .map(Vec::len)
                    .sum();
                let message = format!("会话结束时 {failed} 组暂存任务投递失败");
                self.logger.error(message.as_str());
                self.notifier.notify(&message);
            }
        }
        outcome
    }

    /// 在作用域内使用会话，无论闭包结果如何都会调用 `end_session`
    pub async fn scoped<T, F>(mut self, body: F) -> (T, Result<(), HolderErrors>)
    where
        F: for<'a> FnOnce(&'a mut Dispatcher) -> BoxFuture<'a, T>,
    {
        let value = body(&mut self).await;
        let flushed = self.end_session().await;
        (value, flushed)
    }

    /// 查询作业状态，代理不可达时返回 None
    pub async fn job_status(&mut self, handle: &str) -> Option<JobStatus> {
        let client = self.init_connection(false).await.ok()?;
        match client.job_status(handle).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("查询作业 {} 状态失败: {}", handle, e);
                None
            }
        }
    }

    /// 存活探测，失败时不触发告警
    pub async fn ping(&mut self) -> bool {
        self.init_connection(true).await.is_ok()
    }

    /// 用同样的依赖构造一个新会话，接管给定的暂存器
    fn detached_with(&self, holder: TaskHolder) -> Dispatcher {
        Dispatcher {
            config: self.config.clone(),
            registry: self.registry.clone(),
            connector: self.connector.clone(),
            client: self.client.clone(),
            sequence: self.sequence.clone(),
            holder: Some(holder),
            notifier: self.notifier.clone(),
            logger: self.logger.clone(),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let Some(holder) = self.holder.take().filter(|holder| !holder.is_empty()) else {
            return;
        };

        warn!("会话未调用 end_session，仍有 {} 条暂存任务，尝试兜底投递", holder.len());
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                self.holder = Some(holder);
                let outcome = tokio::task::block_in_place(|| handle.block_on(self.end_session()));
                if outcome.is_err() {
                    error!("兜底投递暂存任务时出现失败");
                }
            }
            Ok(handle) => {
                // 单线程运行时无法同步等待，运行时随后关闭时该任务会被取消
                let message = format!(
                    "会话未调用 end_session，{} 条暂存任务转为后台投递，运行时关闭时可能丢失",
                    holder.len()
                );
                error!("{}", message);
                self.notifier.notify(&message);

                // 暂存器在任务首次运行时才交给新会话，任务被取消时不会再次触发兜底
                let mut detached = self.detached_with(holder);
                let pending = detached.holder.take();
                handle.spawn(async move {
                    detached.holder = pending;
                    if let Err(errors) = detached.end_session().await {
                        error!("后台投递暂存任务失败: {:?}", errors);
                    }
                });
            }
            Err(_) => {
                let message = format!(
                    "没有可用的 tokio 运行时，{} 条暂存任务丢失",
                    holder.len()
                );
                error!("{}", message);
                self.notifier.notify(&message);
            }
        }
    }
}

fn server_down(task: &str, error: &TaskqError) -> DispatchResponse {
    DispatchResponse::failure(
        ErrorCode::ServerDown,
        format!("[TASK => {task}] We have problems with servers. {error}"),
    )
}

/// 回复数据按 JSON 解析，不是 JSON 时按文本返回
fn decode_result(data: &[u8]) -> Value {
    if data.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(data)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(data).into_owned()))
}
