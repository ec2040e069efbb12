use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::NotAllowed;

/// 任务优先级
///
/// 数值编码与存储层保持一致：High=1, Normal=2, Low=3。
/// 排序语义为 High > Normal > Low，即编码越小优先级越高。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// 按优先级从高到低排列
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub const fn code(self) -> i64 {
        match self {
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        other.code().cmp(&self.code())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.code()
    }
}

impl TryFrom<i64> for Priority {
    type Error = NotAllowed;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Priority::from_code(code).ok_or(NotAllowed::Priority(code))
    }
}

/// 未经校验的优先级输入
///
/// 生产者可以传入 `Priority` 或原始数值编码，分发器在产生任何副作用之前统一校验。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityCode(pub i64);

impl PriorityCode {
    pub fn resolve(self) -> Result<Priority, NotAllowed> {
        Priority::try_from(self.0)
    }
}

impl From<Priority> for PriorityCode {
    fn from(priority: Priority) -> Self {
        PriorityCode(priority.code())
    }
}

impl From<i64> for PriorityCode {
    fn from(code: i64) -> Self {
        PriorityCode(code)
    }
}

impl From<i32> for PriorityCode {
    fn from(code: i32) -> Self {
        PriorityCode(i64::from(code))
    }
}
