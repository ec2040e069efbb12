use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use taskq_core::config::SequenceConfig;
use taskq_core::models::sequence_record::{format_sequence_date, sequence_timestamp};
use taskq_core::models::{NewSequenceRecord, SequenceDriver, SequenceRecord};
use taskq_core::{TaskqError, TaskqResult};
use tracing::{instrument, warn};

use super::{DebugTrace, SequenceStore};
use crate::redis_support::{open_connection, scan_keys, sequence_error};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// 计数器的过期时间是记录的 24 倍
const COUNTER_EXPIRE_FACTOR: u64 = 24;
/// 排序键：priority_code * RANK_FACTOR + id
const RANK_FACTOR: i64 = 1_000_000_000_000;
const FIELDS: [&str; 6] = ["id", "task", "priority", "params", "source", "date"];

/// Redis 哈希 + 列表序列存储
///
/// 键布局（均带命名空间前缀）：
/// - `counter` 原子递增的 ID 计数器
/// - `storelist` 记录 ID 列表
/// - `job_{id}` 记录哈希，额外带一个 `rank` 字段供 SORT 使用
pub struct RedisSequenceStore {
    url: String,
    name_space: String,
    expire_seconds: u64,
    connection: Option<MultiplexedConnection>,
    trace: DebugTrace,
}

impl RedisSequenceStore {
    pub fn new(config: &SequenceConfig) -> Self {
        let name_space = config
            .name_space
            .clone()
            .or_else(|| config.table.clone())
            .unwrap_or_default();
        Self {
            url: config.connection_url(SequenceDriver::Redis),
            name_space,
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

    fn counter_key(&self) -> String {
        format!("{}counter", self.name_space)
    }

    fn list_key(&self) -> String {
        format!("{}storelist", self.name_space)
    }

    fn job_key(&self, id: i64) -> String {
        format!("{}job_{}", self.name_space, id)
    }

    fn job_pattern(&self) -> String {
        format!("{}job_*", self.name_space)
    }

    fn rank(priority_code: i64, id: i64) -> i64 {
        priority_code * RANK_FACTOR + id
    }

    fn decode_chunk(chunk: &[Option<String>]) -> TaskqResult<Option<SequenceRecord>> {
        let [Some(id), Some(task), Some(priority), Some(params), Some(source), Some(date)] = chunk
        else {
            return Ok(None);
        };
        let id = id
            .parse::<i64>()
            .map_err(|e| TaskqError::sequence(format!("Invalid record id '{id}': {e}")))?;
        let priority = priority
            .parse::<i64>()
            .map_err(|e| TaskqError::sequence(format!("Invalid priority '{priority}': {e}")))?;
        SequenceRecord::from_row(id, task.clone(), params, priority, source.clone(), date)
            .map(Some)
    }
}

#[async_trait]
impl SequenceStore for RedisSequenceStore {
    fn driver(&self) -> SequenceDriver {
        SequenceDriver::Redis
    }

    #[instrument(skip(self))]
    async fn count(&mut self) -> TaskqResult<u64> {
        let mut conn = self.connection().await?;
        let list_key = self.list_key();
        let result: RedisResult<u64> = conn.llen(&list_key).await;
        self.trace
            .track(format!("LLEN {list_key}"), result)
            .map_err(sequence_error)
    }

    #[instrument(skip(self))]
    async fn fetch_all(&mut self, limit: usize) -> TaskqResult<Vec<SequenceRecord>> {
        let mut conn = self.connection().await?;
        let list_key = self.list_key();
        let prefix = format!("{}job_*->", self.name_space);

        let mut sort = redis::cmd("SORT");
        sort.arg(&list_key).arg("BY").arg(format!("{prefix}rank"));
        if limit > 0 {
            sort.arg("LIMIT").arg(0).arg(limit);
        }
        for field in FIELDS {
            sort.arg("GET").arg(format!("{prefix}{field}"));
        }

        let result: RedisResult<Vec<Option<String>>> = sort.query_async(&mut conn).await;
        let values = self
            .trace
            .track(format!("SORT {list_key} BY {prefix}rank LIMIT 0 {limit}"), result)
            .map_err(sequence_error)?;

        let mut records = Vec::new();
        let mut expired = 0usize;
        for chunk in values.chunks(FIELDS.len()) {
            match Self::decode_chunk(chunk)? {
                Some(record) => records.push(record),
                None => expired += 1,
            }
        }
        if expired > 0 {
            warn!("Skipped {} expired records in {}", expired, list_key);
        }
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn fetch(&mut self, id: i64) -> TaskqResult<Option<SequenceRecord>> {
        let mut conn = self.connection().await?;
        let job_key = self.job_key(id);
        let result: RedisResult<HashMap<String, String>> = conn.hgetall(&job_key).await;
        let row = self
            .trace
            .track(format!("HGETALL {job_key}"), result)
            .map_err(sequence_error)?;
        if row.is_empty() {
            return Ok(None);
        }
        let chunk: Vec<Option<String>> = FIELDS.iter().map(|f| row.get(*f).cloned()).collect();
        Self::decode_chunk(&chunk)
    }

    #[instrument(skip(self, record), fields(task = %record.task))]
    async fn store(&mut self, record: &NewSequenceRecord, id: Option<i64>) -> TaskqResult<i64> {
        record.validate()?;
        let params = record.params_blob()?;
        let mut conn = self.connection().await?;
        let list_key = self.list_key();

        let existing = match id {
            Some(id) => {
                let job_key = self.job_key(id);
                let result: RedisResult<bool> = conn.exists(&job_key).await;
                let exists = self
                    .trace
                    .track(format!("EXISTS {job_key}"), result)
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

        let job_key = self.job_key(id);
        let fields = [
            ("id", id.to_string()),
            ("task", record.task.clone()),
            ("priority", record.priority.code().to_string()),
            ("params", params),
            ("source", record.source.clone()),
            ("date", format_sequence_date(&sequence_timestamp())),
            ("rank", Self::rank(record.priority.code(), id).to_string()),
        ];
        let expire = self.expire_seconds as i64;
        let result: RedisResult<()> = redis::pipe()
            .atomic()
            .lrem(&list_key, 0, id)
            .ignore()
            .hset_multiple(&job_key, &fields)
            .ignore()
            .expire(&job_key, expire)
            .ignore()
            .rpush(&list_key, id)
            .ignore()
            .expire(&list_key, expire)
            .ignore()
            .query_async(&mut conn)
            .await;
        self.trace
            .track(format!("HSET {job_key} / RPUSH {list_key} {id}"), result)
            .map_err(sequence_error)?;

        Ok(id)
    }

    #[instrument(skip(self))]
    async fn remove(&mut self, id: i64) -> TaskqResult<bool> {
        let mut conn = self.connection().await?;
        let job_key = self.job_key(id);
        let list_key = self.list_key();
        let result: RedisResult<(i64, i64)> = redis::pipe()
            .atomic()
            .del(&job_key)
            .lrem(&list_key, 0, id)
            .query_async(&mut conn)
            .await;
        let (deleted, unlisted) = self
            .trace
            .track(format!("DEL {job_key} / LREM {list_key} {id}"), result)
            .map_err(sequence_error)?;
        Ok(deleted > 0 || unlisted > 0)
    }

    #[instrument(skip(self))]
    async fn remove_all(&mut self) -> TaskqResult<bool> {
        let mut conn = self.connection().await?;
        let pattern = self.job_pattern();
        let result = scan_keys(&mut conn, &pattern).await;
        let mut keys = self
            .trace
            .track(format!("SCAN MATCH {pattern}"), result)
            .map_err(sequence_error)?;
        keys.push(self.list_key());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_priority_before_id() {
        let high_late = RedisSequenceStore::rank(1, 900);
        let normal_early = RedisSequenceStore::rank(2, 1);
        assert!(high_late < normal_early);
        assert!(RedisSequenceStore::rank(1, 2) < RedisSequenceStore::rank(1, 10));
    }

    #[test]
    fn test_name_space_falls_back_to_table() {
        let config = SequenceConfig {
            driver: "Redis".into(),
            host: Some("cache".into()),
            table: Some("queue_".into()),
            ..SequenceConfig::default()
        };
        let store = RedisSequenceStore::new(&config);
        assert_eq!(store.list_key(), "queue_storelist");
        assert_eq!(store.job_key(7), "queue_job_7");
    }

    #[test]
    fn test_decode_chunk_skips_expired_entries() {
        let expired = vec![None, None, None, None, None, None];
        assert!(RedisSequenceStore::decode_chunk(&expired).unwrap().is_none());
    }
}
