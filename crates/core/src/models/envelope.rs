use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TaskqResult;

/// 随任务一起发送给 worker 的客户端配置摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EnvelopeConfig {
    pub environment: String,
    pub servers: String,
}

/// 投递到消息代理的任务负载：`{config, params, background}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEnvelope {
    pub config: EnvelopeConfig,
    pub params: Value,
    pub background: bool,
}

impl WorkloadEnvelope {
    pub fn new(config: EnvelopeConfig, params: Value, background: bool) -> Self {
        Self {
            config,
            params,
            background,
        }
    }

    pub fn encode(&self) -> TaskqResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> TaskqResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
