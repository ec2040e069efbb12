use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskq_core::models::WorkloadEnvelope;
use taskq_core::{ErrorNotifier, MessageLogger, TaskqResult, TracingNotifier};
use taskq_infrastructure::{BrokerJob, ReturnCode};

/// 重试退出码（EX_TEMPFAIL），外部进程管理器据此重启 worker
pub const EXIT_CODE_RETRY: i32 = 75;

/// 随失败上报的异常数据
const WORK_FAIL_EXCEPTION: &[u8] = b"WORK_FAIL";

/// 作业结束状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    /// 作业已交还代理，当前 worker 进程随之退出
    RetryPending,
}

/// 进程退出
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// 默认实现：直接结束进程
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// 作业生命周期：完成、失败、稍后重试
///
/// 重试不在进程内计数。`retry_later` 把作业交还代理后直接退出进程，
/// 由外部进程管理器重启 worker，重试次数上限由代理侧的重投策略决定。
#[derive(Clone)]
pub struct JobLifecycle {
    logger: MessageLogger,
    exit: Arc<dyn ProcessExit>,
    notifier: Arc<dyn ErrorNotifier>,
}

impl JobLifecycle {
    pub fn new(logger: MessageLogger) -> Self {
        Self {
            logger,
            exit: Arc::new(StdProcessExit),
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn with_exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = exit;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn logger(&self) -> &MessageLogger {
        &self.logger
    }

    /// 解析作业负载
    pub fn decode_workload(&self, job: &dyn BrokerJob) -> TaskqResult<WorkloadEnvelope> {
        WorkloadEnvelope::decode(job.workload())
    }

    pub async fn send_status(
        &self,
        job: &mut dyn BrokerJob,
        numerator: u32,
        denominator: u32,
    ) -> TaskqResult<()> {
        job.send_status(numerator, denominator).await
    }

    pub async fn send_data(&self, job: &mut dyn BrokerJob, data: &Value) -> TaskqResult<()> {
        job.send_data(serde_json::to_vec(data)?).await
    }

    pub async fn mark_completed(&self, job: &mut dyn BrokerJob, result: Value) -> TaskqResult<JobOutcome> {
        self.logger
            .info(format!("Job \"{}\" marked as completed", job.unique()));
        job.set_return(ReturnCode::Success);
        job.send_complete(serde_json::to_vec(&result)?).await?;
        Ok(JobOutcome::Completed)
    }

    /// 不可重试的失败
    pub async fn mark_failed(&self, job: &mut dyn BrokerJob) -> TaskqResult<JobOutcome> {
        self.logger
            .info(format!("Job \"{}\" marked as failed", job.unique()));
        job.set_return(ReturnCode::WorkFail);
        job.send_exception(WORK_FAIL_EXCEPTION.to_vec()).await?;
        job.send_fail().await?;
        Ok(JobOutcome::Failed)
    }

    /// 等待 `delay_seconds` 后上报失败并交还作业，然后以 [`EXIT_CODE_RETRY`] 退出进程
    ///
    /// 上报或交还失败时只记录并告警，进程仍然退出，代理会在连接断开后重投该作业。
    pub async fn retry_later(&self, job: &mut dyn BrokerJob, delay_seconds: u64) -> TaskqResult<JobOutcome> {
        self.logger.error(format!(
            "Try to execute job \"{}\" again in \"{}\" seconds",
            job.unique(),
            delay_seconds
        ));

        if delay_seconds > 0 {
            tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
        }

        job.set_return(ReturnCode::WorkFail);
        if let Err(e) = job.send_exception(WORK_FAIL_EXCEPTION.to_vec()).await {
            self.report(format!("Job \"{}\" exception was not delivered: {}", job.unique(), e));
        }
        if let Err(e) = job.release().await {
            self.report(format!("Job \"{}\" was not released: {}", job.unique(), e));
        }

        self.exit.exit(EXIT_CODE_RETRY);
        Ok(JobOutcome::RetryPending)
    }

    fn report(&self, message: String) {
        self.logger.error(message.as_str());
        self.notifier.notify(&message);
    }
}
