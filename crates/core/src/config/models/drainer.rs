use serde::{Deserialize, Serialize};

/// 序列回放进程配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DrainerConfig {
    /// 单次拉取的最大记录数
    pub fetch_limit: usize,
    /// 存储为空时的休眠时间（毫秒）
    pub idle_sleep_ms: u64,
    /// 每轮回放之间的间隔（毫秒）
    pub cycle_sleep_ms: u64,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 100,
            idle_sleep_ms: 1000,
            cycle_sleep_ms: 500,
        }
    }
}

impl DrainerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fetch_limit == 0 {
            return Err(anyhow::anyhow!("单次拉取数量必须大于0"));
        }
        Ok(())
    }
}
