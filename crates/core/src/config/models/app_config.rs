use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{BrokerConfig, DrainerConfig, LoggingConfig, SequenceConfig};
use crate::models::EnvelopeConfig;

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 运行环境名称，写入任务负载和序列记录的来源信息
    pub environment: String,
    /// 为 false 时 drainer 和 worker 拒绝启动
    pub ready_to_use: bool,
    pub broker: BrokerConfig,
    /// 允许执行的任务白名单
    pub tasks: Vec<String>,
    /// 服务全部任务时排除的任务
    pub excluded_tasks: Vec<String>,
    /// 未配置时序列存储不可用
    pub sequence: Option<SequenceConfig>,
    pub drainer: DrainerConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "local".to_string(),
            ready_to_use: true,
            broker: BrokerConfig::default(),
            tasks: Vec::new(),
            excluded_tasks: Vec::new(),
            sequence: None,
            drainer: DrainerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML 格式）
    /// 3. 环境变量覆盖（前缀：TASKQ__）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/taskq.toml",
                "taskq.toml",
                "/etc/taskq/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        // 环境变量优先级最高
        builder = builder.add_source(
            Environment::with_prefix("TASKQ")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("tasks")
                .with_list_parse_key("excluded_tasks")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化配置为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            return Err(anyhow::anyhow!("环境名称不能为空"));
        }

        self.broker.validate().context("代理配置验证失败")?;
        self.drainer.validate().context("回放配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        if self.tasks.iter().any(|task| task.trim().is_empty()) {
            return Err(anyhow::anyhow!("任务名称不能为空"));
        }

        Ok(())
    }

    /// 序列存储是否可用
    pub fn is_sequence_available(&self) -> bool {
        self.sequence
            .as_ref()
            .is_some_and(|sequence| !sequence.driver.is_empty())
    }

    /// 序列记录来源：`环境|代理地址`
    pub fn source(&self) -> String {
        format!("{}|{}", self.environment, self.broker.servers_string())
    }

    pub fn envelope_config(&self) -> EnvelopeConfig {
        EnvelopeConfig {
            environment: self.environment.clone(),
            servers: self.broker.servers_string(),
        }
    }
}
