use std::time::Duration;

use taskq_core::config::DrainerConfig;
use taskq_core::models::{SequenceRecord, StoreType};
use taskq_core::{TaskqError, TaskqResult};
use taskq_infrastructure::{SequenceStore, SequenceStoreFactory};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;

/// 单轮回放结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub fetched: usize,
    pub dispatched: usize,
    pub failed: usize,
}

impl DrainReport {
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }
}

/// 序列回放器
///
/// 按存储的优先级顺序读取记录，逐条作为 Direct 任务重新投递，
/// 投递成功后删除记录；投递失败的记录留在存储中等待下一轮。
pub struct SequenceDrainer {
    dispatcher: Dispatcher,
    factory: SequenceStoreFactory,
    config: DrainerConfig,
}

impl SequenceDrainer {
    /// 使用分发器自身的序列存储工厂
    pub fn new(dispatcher: Dispatcher) -> TaskqResult<Self> {
        if !dispatcher.config().ready_to_use {
            return Err(TaskqError::configuration("Dispatcher is not ready to use"));
        }
        let factory = dispatcher
            .sequence_factory()
            .cloned()
            .ok_or_else(|| TaskqError::configuration("Sequence storage is not configured"))?;
        let config = dispatcher.config().drainer.clone();
        Ok(Self::with_factory(dispatcher, factory, config))
    }

    pub fn with_factory(
        dispatcher: Dispatcher,
        factory: SequenceStoreFactory,
        config: DrainerConfig,
    ) -> Self {
        Self {
            dispatcher,
            factory,
            config,
        }
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// 回放一轮，`limit` 为 0 表示不限制
    pub async fn drain_once(&mut self, limit: usize) -> TaskqResult<DrainReport> {
        let mut store = self.factory.create()?;
        let outcome = self.replay(store.as_mut(), limit).await;
        if let Err(e) = store.close().await {
            warn!("关闭序列存储失败: {}", e);
        }
        outcome
    }

    async fn replay(&mut self, store: &mut dyn SequenceStore, limit: usize) -> TaskqResult<DrainReport> {
        let records = store.fetch_all(limit).await?;
        let mut report = DrainReport {
            fetched: records.len(),
            ..DrainReport::default()
        };

        for record in records {
            if self.resubmit(&record).await {
                if !store.remove(record.id).await? {
                    warn!("序列记录 {} 已投递，但删除时记录不存在", record.id);
                }
                report.dispatched += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.fetched > 0 {
            info!(
                "序列回放完成: 拉取 {} 条, 投递 {} 条, 失败 {} 条",
                report.fetched, report.dispatched, report.failed
            );
        }
        Ok(report)
    }

    async fn resubmit(&mut self, record: &SequenceRecord) -> bool {
        let response = self
            .dispatcher
            .submit_background(
                &record.task,
                record.params.clone(),
                record.priority,
                StoreType::Direct,
            )
            .await;

        match response.error {
            None => {
                debug!("序列记录 {} ({}) 已重新投递", record.id, record.task);
                true
            }
            Some(error) => {
                warn!("序列记录 {} ({}) 投递失败: {}", record.id, record.task, error);
                false
            }
        }
    }

    /// 持续回放，直到收到关闭信号
    ///
    /// 存储为空时休眠 `idle_sleep_ms`，每轮之间休眠 `cycle_sleep_ms`。
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> TaskqResult<()> {
        info!(
            "序列回放器启动: fetch_limit={}, idle_sleep_ms={}, cycle_sleep_ms={}",
            self.config.fetch_limit, self.config.idle_sleep_ms, self.config.cycle_sleep_ms
        );

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            let pause = match self.drain_once(self.config.fetch_limit).await {
                Ok(report) if report.is_idle() => self.config.idle_sleep_ms,
                Ok(_) => self.config.cycle_sleep_ms,
                Err(e) => {
                    error!("序列回放失败: {}", e);
                    self.config.idle_sleep_ms
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(pause)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("序列回放器已停止");
        Ok(())
    }

    /// 清空序列存储
    pub async fn purge(&mut self) -> TaskqResult<bool> {
        let mut store = self.factory.create()?;
        let outcome = store.remove_all().await;
        if let Err(e) = store.close().await {
            warn!("关闭序列存储失败: {}", e);
        }
        if matches!(outcome, Ok(true)) {
            warn!("序列存储已清空");
        }
        outcome
    }

    /// 结束分发会话
    pub async fn shutdown(mut self) {
        if let Err(errors) = self.dispatcher.end_session().await {
            error!("关闭回放器时暂存任务投递失败: {:?}", errors);
        }
    }
}
