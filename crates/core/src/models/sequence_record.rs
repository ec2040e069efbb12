use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Priority;
use crate::errors::{TaskqError, TaskqResult};

/// 序列记录时间戳的持久化格式（微秒精度）
pub const SEQUENCE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// 待写入序列存储的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSequenceRecord {
    pub task: String,
    pub params: Value,
    pub priority: Priority,
    /// 来源信息：`环境|代理地址`
    pub source: String,
}

impl NewSequenceRecord {
    pub fn new(
        task: impl Into<String>,
        params: Value,
        priority: Priority,
        source: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            params,
            priority,
            source: source.into(),
        }
    }

    /// 校验必填字段：task、params、source 均不能为空
    pub fn validate(&self) -> TaskqResult<()> {
        if self.task.trim().is_empty() {
            return Err(TaskqError::sequence("Field 'task' is required"));
        }
        if is_blank(&self.params) {
            return Err(TaskqError::sequence("Field 'params' is required"));
        }
        if self.source.trim().is_empty() {
            return Err(TaskqError::sequence("Field 'source' is required"));
        }
        Ok(())
    }

    /// 序列化参数为持久化文本
    pub fn params_blob(&self) -> TaskqResult<String> {
        Ok(serde_json::to_string(&self.params)?)
    }
}

/// 已持久化的序列记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub id: i64,
    pub task: String,
    pub params: Value,
    pub priority: Priority,
    pub source: String,
    pub date: DateTime<Utc>,
}

impl SequenceRecord {
    /// 由持久化的行字段还原记录，params 在此处反序列化
    pub fn from_row(
        id: i64,
        task: String,
        params_blob: &str,
        priority_code: i64,
        source: String,
        date: &str,
    ) -> TaskqResult<Self> {
        let priority = Priority::try_from(priority_code)
            .map_err(|e| TaskqError::sequence(format!("Record {id}: {e}")))?;
        Ok(Self {
            id,
            task,
            params: serde_json::from_str(params_blob)?,
            priority,
            source,
            date: parse_sequence_date(date)?,
        })
    }

    pub fn from_new(id: i64, record: &NewSequenceRecord, date: DateTime<Utc>) -> Self {
        Self {
            id,
            task: record.task.clone(),
            params: record.params.clone(),
            priority: record.priority,
            source: record.source.clone(),
            date,
        }
    }

    /// 按存储排序键比较：优先级从高到低，同优先级按 ID 升序
    pub fn storage_order(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority.code(), self.id).cmp(&(other.priority.code(), other.id))
    }
}

/// 当前时间，截断到微秒，与持久化格式的精度一致
pub fn sequence_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_sequence_date(date: &DateTime<Utc>) -> String {
    date.format(SEQUENCE_DATE_FORMAT).to_string()
}

pub fn parse_sequence_date(value: &str) -> TaskqResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, SEQUENCE_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| TaskqError::sequence(format!("Invalid record date '{value}': {e}")))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}
