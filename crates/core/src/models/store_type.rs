use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::NotAllowed;

/// 后台任务存储策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum StoreType {
    /// 立即投递到消息代理
    Direct,
    /// 持久化到序列存储，由 drainer 稍后回放
    Sequence,
    /// 暂存在会话内存中，会话结束时批量投递
    Holder,
}

impl StoreType {
    pub const ALL: [StoreType; 3] = [StoreType::Direct, StoreType::Sequence, StoreType::Holder];

    pub const fn code(self) -> i64 {
        match self {
            StoreType::Direct => 1,
            StoreType::Sequence => 2,
            StoreType::Holder => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(StoreType::Direct),
            2 => Some(StoreType::Sequence),
            3 => Some(StoreType::Holder),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoreType::Direct => "direct",
            StoreType::Sequence => "sequence",
            StoreType::Holder => "holder",
        }
    }
}

impl Default for StoreType {
    fn default() -> Self {
        StoreType::Direct
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StoreType> for i64 {
    fn from(store_type: StoreType) -> Self {
        store_type.code()
    }
}

impl TryFrom<i64> for StoreType {
    type Error = NotAllowed;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        StoreType::from_code(code).ok_or(NotAllowed::StoreType(code))
    }
}

/// 未经校验的存储类型输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTypeCode(pub i64);

impl StoreTypeCode {
    pub fn resolve(self) -> Result<StoreType, NotAllowed> {
        StoreType::try_from(self.0)
    }
}

impl From<StoreType> for StoreTypeCode {
    fn from(store_type: StoreType) -> Self {
        StoreTypeCode(store_type.code())
    }
}

impl From<i64> for StoreTypeCode {
    fn from(code: i64) -> Self {
        StoreTypeCode(code)
    }
}

impl From<i32> for StoreTypeCode {
    fn from(code: i32) -> Self {
        StoreTypeCode(i64::from(code))
    }
}
