use serde::{Deserialize, Serialize};

/// 消息日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 级别掩码：ERROR=1, INFO=2, DEBUG=4
    pub level_mask: u8,
    /// 是否同时输出到标准输出
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level_mask: 7,
            debug: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.level_mask > 7 {
            return Err(anyhow::anyhow!("日志级别掩码必须在0到7之间"));
        }
        Ok(())
    }
}
