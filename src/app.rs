use anyhow::{Context, Result};
use taskq_core::AppConfig;
use taskq_dispatcher::{Dispatcher, SequenceDrainer};
use taskq_worker::{WorkerExit, WorkerService};
use tokio::sync::watch;
use tracing::{info, warn};

/// 进程退出码：一切正常
pub const EXIT_OK: i32 = 0;
/// 进程退出码：需要外部重启或操作失败
pub const EXIT_FAILURE: i32 = 1;

/// 子命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// 运行 worker，可选只服务单个任务
    Worker { task: Option<String> },
    /// 回放序列存储
    Drain { once: bool },
    /// 清空序列存储
    PurgeSequence,
    /// 探测消息代理
    Ping,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    command: AppCommand,
}

impl Application {
    pub fn new(config: AppConfig, command: AppCommand) -> Self {
        Self { config, command }
    }

    /// 执行子命令并返回进程退出码
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> Result<i32> {
        info!("执行命令: {:?}", self.command);

        match self.command {
            AppCommand::Worker { task } => run_worker(self.config, task, shutdown_rx).await,
            AppCommand::Drain { once } => run_drain(self.config, once, shutdown_rx).await,
            AppCommand::PurgeSequence => purge_sequence(self.config).await,
            AppCommand::Ping => ping(self.config).await,
        }
    }
}

async fn run_worker(
    config: AppConfig,
    task: Option<String>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<i32> {
    let service = WorkerService::from_config(config);
    let exit = service
        .run(task.as_deref(), shutdown_rx)
        .await
        .context("worker 运行失败")?;

    Ok(match exit {
        WorkerExit::Shutdown => EXIT_OK,
        WorkerExit::Empty | WorkerExit::Restart => EXIT_FAILURE,
    })
}

async fn run_drain(config: AppConfig, once: bool, shutdown_rx: watch::Receiver<bool>) -> Result<i32> {
    let fetch_limit = config.drainer.fetch_limit;
    let mut drainer =
        SequenceDrainer::new(Dispatcher::from_config(config)).context("创建序列回放器失败")?;

    let outcome = if once {
        drainer.drain_once(fetch_limit).await.map(|report| {
            info!(
                "单轮回放: 拉取 {} 条, 投递 {} 条, 失败 {} 条",
                report.fetched, report.dispatched, report.failed
            );
            if report.failed > 0 {
                EXIT_FAILURE
            } else {
                EXIT_OK
            }
        })
    } else {
        drainer.run(shutdown_rx).await.map(|_| EXIT_OK)
    };

    drainer.shutdown().await;
    outcome.context("序列回放失败")
}

async fn purge_sequence(config: AppConfig) -> Result<i32> {
    let mut drainer =
        SequenceDrainer::new(Dispatcher::from_config(config)).context("创建序列回放器失败")?;
    let purged = drainer.purge().await;
    drainer.shutdown().await;

    if purged.context("清空序列存储失败")? {
        Ok(EXIT_OK)
    } else {
        warn!("序列存储未被清空");
        Ok(EXIT_FAILURE)
    }
}

async fn ping(config: AppConfig) -> Result<i32> {
    let servers = config.broker.servers_string();
    let mut dispatcher = Dispatcher::from_config(config);
    let alive = dispatcher.ping().await;

    if alive {
        info!("消息代理可达: {}", servers);
        Ok(EXIT_OK)
    } else {
        warn!("消息代理不可达: {}", servers);
        Ok(EXIT_FAILURE)
    }
}
