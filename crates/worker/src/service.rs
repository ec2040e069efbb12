use std::sync::Arc;
use std::time::Duration;

use taskq_core::{
    AppConfig, ErrorNotifier, MessageLogger, Registry, TaskqError, TaskqResult, TracingNotifier,
};
use taskq_infrastructure::{connector_for, BrokerConnector, BrokerJob, BrokerWorker};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::handler::HandlerRegistry;
use crate::lifecycle::{JobLifecycle, JobOutcome, ProcessExit};

/// 没有可服务任务时，退出前的等待
const EMPTY_WORKER_DELAY: Duration = Duration::from_secs(1);
/// 单次领取作业的等待上限
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// worker 退出原因，由进程入口映射为退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// 没有注册任何任务
    Empty,
    /// 代理连接失败，等待外部重启
    Restart,
    /// 收到关闭信号
    Shutdown,
}

/// worker 主循环：注册任务，逐个领取作业并交给处理器
pub struct WorkerService {
    config: Arc<AppConfig>,
    registry: Registry,
    handlers: HandlerRegistry,
    connector: Arc<dyn BrokerConnector>,
    notifier: Arc<dyn ErrorNotifier>,
    lifecycle: JobLifecycle,
    poll_timeout: Duration,
}

impl WorkerService {
    pub fn new(
        config: AppConfig,
        registry: Registry,
        handlers: HandlerRegistry,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        let logger = MessageLogger::from_config(&config.logging);
        Self {
            config: Arc::new(config),
            registry,
            handlers,
            connector,
            notifier: Arc::new(TracingNotifier),
            lifecycle: JobLifecycle::new(logger),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// 按配置构建，使用内置处理器
    pub fn from_config(config: AppConfig) -> Self {
        let registry = Registry::from_config(&config);
        let connector = connector_for(&config.broker);
        Self::new(config, registry, HandlerRegistry::with_builtin(), connector)
    }

    pub fn with_exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.lifecycle = self.lifecycle.with_exit(exit);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.lifecycle = self.lifecycle.with_notifier(notifier.clone());
        self.notifier = notifier;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    /// 本次运行要服务的任务
    ///
    /// 单任务模式只取该任务，否则取全部白名单任务并排除 `excluded_tasks`；
    /// 没有处理器的任务会被跳过。
    pub fn select_tasks(&self, single_task: Option<&str>) -> Vec<String> {
        self.registry
            .tasks()
            .filter(|task| match single_task {
                Some(single) => *task == single,
                None => !self.config.excluded_tasks.iter().any(|excluded| excluded == task),
            })
            .filter(|task| {
                let known = self.handlers.contains(task);
                if !known {
                    warn!("任务 {} 没有对应的处理器，跳过", task);
                }
                known
            })
            .map(str::to_string)
            .collect()
    }

    /// 运行 worker 直到关闭信号、代理故障或无任务可服务
    pub async fn run(
        &self,
        single_task: Option<&str>,
        mut shutdown: watch::Receiver<bool>,
    ) -> TaskqResult<WorkerExit> {
        if !self.config.ready_to_use {
            return Err(TaskqError::configuration("Worker is not ready to use"));
        }

        let env = self.config.environment.as_str();
        let logger = self.lifecycle.logger();
        let mut worker = self.connect().await?;

        let tasks = self.select_tasks(single_task);
        if tasks.is_empty() {
            let scope = match single_task {
                Some(task) => format!("{task} task"),
                None => "all tasks".to_string(),
            };
            logger.error(format!("Found empty \"{env}\" worker for {scope} ..."));
            tokio::time::sleep(EMPTY_WORKER_DELAY).await;
            return Ok(WorkerExit::Empty);
        }

        for task in &tasks {
            worker.register(task);
        }
        match single_task {
            Some(task) => logger.info(format!("Up \"{env}\" single {task} worker ...")),
            None => logger.info(format!("Up \"{env}\" worker ...")),
        };
        debug!("worker 已注册任务: {:?}", worker.registered());

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let grabbed = tokio::select! {
                grabbed = worker.grab_job(self.poll_timeout) => grabbed,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match grabbed {
                Ok(Some(mut job)) => {
                    logger.info(format!("Worker \"{env}\" in progress ..."));
                    self.process(job.as_mut()).await;
                }
                Ok(None) => {}
                Err(e) => {
                    logger.error(format!("Restart \"{env}\" worker ... {e}"));
                    self.notifier.notify(&format!(
                        "Worker ERROR: {e}. [{}]",
                        self.config.broker.servers_string()
                    ));
                    return Ok(WorkerExit::Restart);
                }
            }
        }

        logger.info(format!("Halt \"{env}\" worker ..."));
        Ok(WorkerExit::Shutdown)
    }

    async fn connect(&self) -> TaskqResult<Box<dyn BrokerWorker>> {
        let reason = match self.connector.connect_worker(&self.config.broker).await {
            Ok(worker) => match worker.ping().await {
                Ok(true) => return Ok(worker),
                Ok(false) => "Workers are not reachable.".to_string(),
                Err(e) => format!("Workers are not reachable. {e}"),
            },
            Err(e) => format!("Workers are not reachable. {e}"),
        };

        let message = format!(
            "Worker ERROR: {reason} [{}]",
            self.config.broker.servers_string()
        );
        self.lifecycle.logger().error(message.as_str());
        self.notifier.notify(&message);
        Err(TaskqError::ServerDown(message))
    }

    /// 执行单个作业；处理器报错或缺失时标记为失败
    pub async fn process(&self, job: &mut dyn BrokerJob) -> Option<JobOutcome> {
        let function = job.function_name().to_string();
        let outcome = match self.handlers.get(&function) {
            Some(handler) => handler.execute(job, &self.lifecycle).await,
            None => Err(TaskqError::Internal(format!(
                "No handler registered for task {function}"
            ))),
        };

        match outcome {
            Ok(outcome) => {
                debug!("作业 {} ({}) 结束: {:?}", job.handle(), function, outcome);
                Some(outcome)
            }
            Err(e) => {
                error!("作业 {} ({}) 执行失败: {}", job.handle(), function, e);
                match self.lifecycle.mark_failed(job).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        error!("无法上报作业 {} 失败状态: {}", job.handle(), e);
                        None
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for WorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerService")
            .field("environment", &self.config.environment)
            .field("handlers", &self.handlers.names().collect::<Vec<_>>())
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

