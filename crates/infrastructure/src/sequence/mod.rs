//! 序列存储：无法或不应立即投递的任务的持久化后备
//!
//! 所有后端遵循同一契约：
//! - `fetch_all` 按优先级从高到低、同优先级按 ID 升序返回
//! - `store` 不带 ID 时分配新 ID 并插入，带 ID 且记录存在时原地更新
//! - ID 分配必须使用后端原生的原子递增能力
//! - 连接在首次操作时建立，在 `close` 时释放

mod key_value;
mod memory;
mod redis_hash;
mod sql;

pub use key_value::KeyValueSequenceStore;
pub use memory::{MemorySequenceStore, MemorySequenceTable};
pub use redis_hash::RedisSequenceStore;
pub use sql::SqlSequenceStore;

use std::fmt::Display;

use async_trait::async_trait;
use taskq_core::config::SequenceConfig;
use taskq_core::models::{NewSequenceRecord, SequenceDriver, SequenceRecord};
use taskq_core::{Registry, TaskqResult};
use tracing::debug;

#[async_trait]
pub trait SequenceStore: Send {
    fn driver(&self) -> SequenceDriver;

    /// 待处理记录数
    async fn count(&mut self) -> TaskqResult<u64>;

    async fn has_data(&mut self) -> TaskqResult<bool> {
        Ok(self.count().await? > 0)
    }

    /// `limit` 为 0 表示不限制
    async fn fetch_all(&mut self, limit: usize) -> TaskqResult<Vec<SequenceRecord>>;

    async fn fetch(&mut self, id: i64) -> TaskqResult<Option<SequenceRecord>>;

    async fn store(&mut self, record: &NewSequenceRecord, id: Option<i64>) -> TaskqResult<i64>;

    /// 记录不存在时返回 false
    async fn remove(&mut self, id: i64) -> TaskqResult<bool>;

    async fn remove_all(&mut self) -> TaskqResult<bool>;

    fn debug_trace(&self) -> &[String];

    async fn close(&mut self) -> TaskqResult<()>;
}

/// 调试轨迹，仅在配置 `debug = true` 时记录
#[derive(Debug, Default, Clone)]
pub struct DebugTrace {
    enabled: bool,
    entries: Vec<String>,
}

impl DebugTrace {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, ok: bool, operation: impl Display) {
        if !self.enabled {
            return;
        }
        let status = if ok { "OK" } else { "ERROR" };
        let entry = format!("[STATUS => \"{status}\"] {operation}");
        debug!("{}", entry);
        self.entries.push(entry);
    }

    /// 记录操作结果并原样返回
    pub fn track<T, E>(&mut self, operation: impl Display, result: Result<T, E>) -> Result<T, E> {
        self.record(result.is_ok(), operation);
        result
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// 按驱动名构建存储实例
///
/// 每次 `create` 返回一个新实例，调用方在一批操作结束后调用 `close`。
/// `Memory` 驱动的所有实例共享工厂持有的同一张表。
#[derive(Debug, Clone)]
pub struct SequenceStoreFactory {
    config: SequenceConfig,
    registry: Registry,
    memory: MemorySequenceTable,
}

impl SequenceStoreFactory {
    pub fn new(config: SequenceConfig, registry: Registry) -> Self {
        Self {
            config,
            registry,
            memory: MemorySequenceTable::default(),
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// 校验驱动白名单和必填配置，但不建立连接
    pub fn resolve_driver(&self) -> TaskqResult<SequenceDriver> {
        let driver = self.registry.check_driver(&self.config.driver)?;
        self.config.validate_for(driver)?;
        Ok(driver)
    }

    pub fn create(&self) -> TaskqResult<Box<dyn SequenceStore>> {
        let driver = self.resolve_driver()?;
        debug!("Creating sequence store with driver {}", driver);

        let store: Box<dyn SequenceStore> = match driver {
            SequenceDriver::PdoMysql | SequenceDriver::Mysqli | SequenceDriver::Sqlite => {
                Box::new(SqlSequenceStore::new(driver, &self.config))
            }
            SequenceDriver::Redis => Box::new(RedisSequenceStore::new(&self.config)),
            SequenceDriver::KeyValue => Box::new(KeyValueSequenceStore::new(&self.config)),
            SequenceDriver::Memory => Box::new(MemorySequenceStore::new(
                self.memory.clone(),
                self.config.debug,
            )),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskq_core::{NotAllowed, TaskqError};

    #[test]
    fn test_debug_trace_only_when_enabled() {
        let mut silent = DebugTrace::new(false);
        silent.record(true, "LLEN storelist");
        assert!(silent.entries().is_empty());

        let mut trace = DebugTrace::new(true);
        let _ = trace.track("DEL job_1", Err::<(), _>("gone"));
        assert_eq!(trace.entries(), ["[STATUS => \"ERROR\"] DEL job_1"]);
    }

    #[test]
    fn test_factory_rejects_unknown_driver() {
        let config = SequenceConfig {
            driver: "Memcached".into(),
            ..SequenceConfig::default()
        };
        let factory = SequenceStoreFactory::new(config, Registry::new());
        assert!(matches!(
            factory.create(),
            Err(TaskqError::NotAllowed(NotAllowed::Driver(_)))
        ));
    }

    #[test]
    fn test_factory_rejects_incomplete_config() {
        let config = SequenceConfig {
            driver: "PDOMysql".into(),
            host: Some("db".into()),
            ..SequenceConfig::default()
        };
        let factory = SequenceStoreFactory::new(config, Registry::new());
        assert!(matches!(factory.create(), Err(TaskqError::Configuration(_))));
    }
}
