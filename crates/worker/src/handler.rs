use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskq_core::TaskqResult;
use taskq_infrastructure::BrokerJob;

use crate::lifecycle::{JobLifecycle, JobOutcome};
use crate::tasks::CheckTimeTask;

/// 任务处理器
///
/// `execute` 必须通过 [`JobLifecycle`] 结束作业；返回 `Err` 时
/// worker 会把作业标记为失败。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        job: &mut dyn BrokerJob,
        lifecycle: &JobLifecycle,
    ) -> TaskqResult<JobOutcome>;
}

/// 任务名到处理器的映射，只包含显式注册的处理器
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含内置任务的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CheckTimeTask));
        registry
    }

    /// 同名处理器会被替换
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(handler.name().to_string(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
