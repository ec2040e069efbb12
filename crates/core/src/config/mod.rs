//! 配置管理
//!
//! 配置按以下顺序加载：
//! 1. 结构体默认值
//! 2. TOML 配置文件
//! 3. 环境变量覆盖（前缀 `TASKQ`，层级分隔符 `__`）

pub mod models;

pub use models::{
    AppConfig, BrokerConfig, BrokerKind, DrainerConfig, LoggingConfig, SequenceConfig,
    ServerAddress,
};
