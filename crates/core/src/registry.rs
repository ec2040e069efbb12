use std::collections::BTreeSet;

use crate::config::AppConfig;
use crate::errors::NotAllowed;
use crate::models::SequenceDriver;

/// 任务与存储驱动白名单
///
/// 只有显式注册的名称才能被分发或执行，不做任何运行时扫描。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    tasks: BTreeSet<String>,
    drivers: BTreeSet<SequenceDriver>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            tasks: BTreeSet::new(),
            drivers: SequenceDriver::ALL.into_iter().collect(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::default();
        for task in tasks {
            registry.register_task(task);
        }
        registry
    }

    /// 以配置中的任务白名单构建
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_tasks(config.tasks.iter().cloned())
    }

    pub fn register_task(&mut self, name: impl Into<String>) -> &mut Self {
        self.tasks.insert(name.into());
        self
    }

    /// 将驱动白名单限制为给定集合
    pub fn restrict_drivers<I>(&mut self, drivers: I) -> &mut Self
    where
        I: IntoIterator<Item = SequenceDriver>,
    {
        self.drivers = drivers.into_iter().collect();
        self
    }

    pub fn is_allowed_task(&self, name: &str) -> bool {
        self.tasks.contains(name)
    }

    pub fn is_allowed_driver(&self, name: &str) -> bool {
        self.check_driver(name).is_ok()
    }

    pub fn check_task(&self, name: &str) -> Result<(), NotAllowed> {
        if self.is_allowed_task(name) {
            Ok(())
        } else {
            Err(NotAllowed::Task(name.to_string()))
        }
    }

    pub fn check_driver(&self, name: &str) -> Result<SequenceDriver, NotAllowed> {
        let driver: SequenceDriver = name.parse()?;
        if self.drivers.contains(&driver) {
            Ok(driver)
        } else {
            Err(NotAllowed::Driver(name.to_string()))
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(String::as_str)
    }
}
