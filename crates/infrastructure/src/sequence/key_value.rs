use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use serde::{Deserialize, Serialize};
use taskq_core::config::SequenceConfig;
use taskq_core::models::sequence_record::{format_sequence_date, sequence_timestamp};
use taskq_core::models::{NewSequenceRecord, SequenceDriver, SequenceRecord};
use taskq_core::{TaskqError, TaskqResult};
use tracing::instrument;

use super::{DebugTrace, SequenceStore};
use crate::redis_support::{open_connection, scan_keys, sequence_error};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const COUNTER_EXPIRE_FACTOR: u64 = 24;
const COUNTER_SUFFIX: &str = "counter";

/// 键值存储中的记录布局，字段与 SQL 表和哈希存储一致
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    id: i64,
    task: String,
    /// 序列化后的参数文本
    params: String,
    priority: i64,
    source: String,
    date: String,
}

impl StoredRecord {
    fn new(id: i64, record: &NewSequenceRecord) -> TaskqResult<Self> {
        Ok(Self {
            id,
            task: record.task.clone(),
            params: record.params_blob()?,
            priority: record.priority.code(),
            source: record.source.clone(),
            date: format_sequence_date(&sequence_timestamp()),
        })
    }

    fn decode(raw: &str) -> TaskqResult<SequenceRecord> {
        let stored: StoredRecord = serde_json::from_str(raw)?;
        SequenceRecord::from_row(
            stored.id,
            stored.task,
            &stored.params,
            stored.priority,
            stored.source,
            &stored.date,
        )
    }
}

/// 键值 + TTL 序列存储
///
/// 每条记录序列化后存放在 `{prefix}{id}`，计数器为 `{prefix}counter`。
/// 键通过 SCAN 枚举，排序在客户端完成。
pub struct KeyValueSequenceStore {
    url: String,
    prefix: String,
    expire_seconds: u64,
    connection: Option<MultiplexedConnection>,
    trace: DebugTrace,
}

impl KeyValueSequenceStore {
    pub fn new(config: &SequenceConfig) -> Self {
        let prefix = config
            .prefix
            .clone()
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or_else(|| format!("{}_", config.table_name()));
        Self {
            url: config.connection_url(SequenceDriver::KeyValue),
            prefix,
            expire_seconds: config.store_expire_seconds,
            connection: None,
            trace: DebugTrace::new(config.debug),
        }
    }

    async fn connection(&mut self) -> TaskqResult<MultiplexedConnection> {
        if let Some(conn) = &self.connection {
            return Ok(conn.clone());
        }
        let conn = open_connection(&self.url, CONNECT_TIMEOUT)
            .await
            .map_err(|e| TaskqError::Connection(format!("Connect failed: {e}")))?;
        self.connection = Some(conn.clone());
        Ok(conn)
    }

    fn record_key(&self, id: i64) -> String {
        format!("{}{}", self.prefix, id)
    }

    fn counter_key(&self) -> String {
        format!("{}{}", self.prefix, COUNTER_SUFFIX)
    }

    /// SCAN 的 MATCH 会把前缀中的 `?`、`[` 当作通配符，返回的键需要再确认前缀
    fn is_record_key(&self, key: &str) -> bool {
        key.strip_prefix(self.prefix.as_str())
            .is_some_and(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
    }

    /// 当前前缀下的记录键（不含计数器）
    async fn record_keys(&mut self, conn: &mut MultiplexedConnection) -> TaskqResult<Vec<String>> {
        let pattern = format!("{}*", self.prefix);
        let counter_key = self.counter_key();
        let result = scan_keys(conn, &pattern).await;
        let keys = self
            .trace
            .track(format!("SCAN MATCH {pattern}"), result)
            .map_err(sequence_error)?;
        Ok(keys
            .into_iter()
            .filter(|key| *key != counter_key && self.is_record_key(key))
            .collect())
    }
}

#[async_trait]
impl SequenceStore for KeyValueSequenceStore {
    fn driver(&self) -> SequenceDriver {
        SequenceDriver::KeyValue
    }

    #[instrument(skip(self))]
    async fn count(&mut self) -> TaskqResult<u64> {
        let mut conn = self.connection().await?;
        Ok(self.record_keys(&mut conn).await?.len() as u64)
    }

    #[instrument(skip(self))]
    async fn fetch_all(&mut self, limit: usize) -> TaskqResult<Vec<SequenceRecord>> {
        let mut conn = self.connection().await?;
        let keys = self.record_keys(&mut conn).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let result: RedisResult<Vec<Option<String>>> =
            redis::cmd("MGET").arg(&keys).query_async(&mut conn).await;
        let values = self
            .trace
            .track(format!("MGET {} keys", keys.len()), result)
            .map_err(sequence_error)?;

        let mut records = values
            .into_iter()
            .flatten()
            .map(|raw| StoredRecord::decode(&raw))
            .collect::<TaskqResult<Vec<_>>>()?;
        records.sort_by(SequenceRecord::storage_order);
        if limit > 0 {
            records.truncate(limit);
        }
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn fetch(&mut self, id: i64) -> TaskqResult<Option<SequenceRecord>> {
        let mut conn = self.connection().await?;
        let key = self.record_key(id);
        let result: RedisResult<Option<String>> = conn.get(&key).await;
        let raw = self
            .trace
            .track(format!("GET {key}"), result)
            .map_err(sequence_error)?;
        raw.map(|raw| StoredRecord::decode(&raw)).transpose()
    }

    #[instrument(skip(self, record), fields(task = %record.task))]
    async fn store(&mut self, record: &NewSequenceRecord, id: Option<i64>) -> TaskqResult<i64> {
        record.validate()?;
        let mut conn = self.connection().await?;

        let existing = match id {
            Some(id) => {
                let key = self.record_key(id);
                let result: RedisResult<bool> = conn.exists(&key).await;
                let exists = self
                    .trace
                    .track(format!("EXISTS {key}"), result)
                    .map_err(sequence_error)?;
                exists.then_some(id)
            }
            None => None,
        };

        let id = match existing {
            Some(id) => id,
            None => {
                let counter_key = self.counter_key();
                let result: RedisResult<(i64,)> = redis::pipe()
                    .atomic()
                    .incr(&counter_key, 1)
                    .expire(&counter_key, (self.expire_seconds * COUNTER_EXPIRE_FACTOR) as i64)
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                let (id,) = self
                    .trace
                    .track(format!("INCR {counter_key}"), result)
                    .map_err(sequence_error)?;
                id
            }
        };

        let key = self.record_key(id);
        let value = serde_json::to_string(&StoredRecord::new(id, record)?)?;
        let result: RedisResult<()> = conn.set_ex(&key, value, self.expire_seconds).await;
        self.trace
            .track(format!("SET {key} EX {}", self.expire_seconds), result)
            .map_err(sequence_error)?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn remove(&mut self, id: i64) -> TaskqResult<bool> {
        let mut conn = self.connection().await?;
        let key = self.record_key(id);
        let result: RedisResult<i64> = conn.del(&key).await;
        let deleted = self
            .trace
            .track(format!("DEL {key}"), result)
            .map_err(sequence_error)?;
        Ok(deleted > 0)
    }

    #[instrument(skip(self))]
    async fn remove_all(&mut self) -> TaskqResult<bool> {
        let mut conn = self.connection().await?;
        let mut keys = self.record_keys(&mut conn).await?;
        keys.push(self.counter_key());
        let result: RedisResult<i64> = conn.del(&keys).await;
        self.trace
            .track(format!("DEL {} keys", keys.len()), result)
            .map_err(sequence_error)?;
        Ok(true)
    }

    fn debug_trace(&self) -> &[String] {
        self.trace.entries()
    }

    async fn close(&mut self) -> TaskqResult<()> {
        self.connection = None;
        Ok(())
    }
}
