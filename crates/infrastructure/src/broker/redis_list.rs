use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use taskq_core::config::BrokerConfig;
use taskq_core::models::Priority;
use taskq_core::{TaskqError, TaskqResult};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BrokerClient, BrokerJob, BrokerReply, BrokerWorker, JobHandle, JobStatus, ReplyStream,
    ReturnCode,
};
use crate::redis_support::{broker_error, open_connection, redact_url, test_connection};

/// 作业元数据保留时间（秒）
const JOB_TTL_SECONDS: i64 = 86_400;
/// 轮询队列和回复列表的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 基于 Redis 列表的消息代理
///
/// 键布局（均带 `queue_prefix` 前缀）：
/// - `queue:{task}:{priority}` 待领取作业句柄列表，LPUSH 入队、RPOP 出队
/// - `job:{handle}` 作业元数据哈希
/// - `reply:{handle}` 同步调用的回复列表
#[derive(Clone)]
pub struct RedisBroker {
    conn: MultiplexedConnection,
    prefix: String,
    host: String,
    timeout: Duration,
}

impl RedisBroker {
    /// 依次尝试配置中的服务端，返回第一个可用的连接
    pub async fn connect(config: &BrokerConfig) -> TaskqResult<Self> {
        let timeout = Duration::from_millis(config.client_timeout_ms);
        let mut last_error = None;

        for server in &config.servers {
            let url = config.build_url(server);
            match open_connection(&url, timeout).await {
                Ok(conn) => {
                    info!("Connected to Redis broker at {}", redact_url(&url));
                    let host = hostname::get()
                        .ok()
                        .and_then(|name| name.into_string().ok())
                        .unwrap_or_else(|| "localhost".to_string());
                    return Ok(Self {
                        conn,
                        prefix: config.queue_prefix.clone(),
                        host,
                        timeout,
                    });
                }
                Err(e) => {
                    warn!("Redis broker {} is not reachable: {}", server, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TaskqError::ServerDown(format!(
            "Clients are not reachable. [{}] {}",
            config.servers_string(),
            last_error.map_or_else(String::new, |e| e.to_string())
        )))
    }

    pub fn into_worker(self) -> RedisWorker {
        RedisWorker {
            broker: self,
            functions: BTreeSet::new(),
        }
    }

    fn queue_key(&self, task: &str, priority: Priority) -> String {
        format!("{}queue:{}:{}", self.prefix, task, priority.code())
    }

    fn job_key(&self, handle: &str) -> String {
        format!("{}job:{}", self.prefix, handle)
    }

    fn reply_key(&self, handle: &str) -> String {
        format!("{}reply:{}", self.prefix, handle)
    }

    async fn submit(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
        foreground: bool,
    ) -> TaskqResult<JobHandle> {
        let handle = format!("H:{}:{}", self.host, Uuid::new_v4().simple());
        let job_key = self.job_key(&handle);
        let fields = [
            ("function", task.to_string()),
            ("unique", Uuid::new_v4().to_string()),
            ("priority", priority.code().to_string()),
            ("foreground", if foreground { "1" } else { "0" }.to_string()),
            ("running", "0".to_string()),
            ("numerator", "0".to_string()),
            ("denominator", "0".to_string()),
        ];

        let mut conn = self.conn.clone();
        let result: RedisResult<()> = redis::pipe()
            .atomic()
            .hset_multiple(&job_key, &fields)
            .ignore()
            .hset(&job_key, "workload", workload)
            .ignore()
            .expire(&job_key, JOB_TTL_SECONDS)
            .ignore()
            .lpush(self.queue_key(task, priority), &handle)
            .ignore()
            .query_async(&mut conn)
            .await;
        result.map_err(broker_error)?;

        debug!("Queued job {} for task {} with priority {}", handle, task, priority);
        Ok(handle)
    }
}

#[async_trait]
impl BrokerClient for RedisBroker {
    async fn ping(&self) -> TaskqResult<bool> {
        let mut conn = self.conn.clone();
        match tokio::time::timeout(self.timeout, test_connection(&mut conn)).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                debug!("Redis broker ping failed: {}", e);
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }

    async fn call_sync(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<Box<dyn ReplyStream>> {
        let handle = self.submit(task, workload, priority, true).await?;
        Ok(Box::new(RedisReplyStream {
            conn: self.conn.clone(),
            reply_key: self.reply_key(&handle),
            timeout: self.timeout,
        }))
    }

    async fn call_async(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<JobHandle> {
        self.submit(task, workload, priority, false).await
    }

    async fn job_status(&self, handle: &str) -> TaskqResult<JobStatus> {
        let mut conn = self.conn.clone();
        let fields: Vec<Option<u32>> = conn
            .hget(self.job_key(handle), &["running", "numerator", "denominator"])
            .await
            .map_err(broker_error)?;

        if fields.iter().all(Option::is_none) {
            return Ok(JobStatus::default());
        }
        Ok(JobStatus {
            known: true,
            running: fields[0] == Some(1),
            numerator: fields[1].unwrap_or(0),
            denominator: fields[2].unwrap_or(0),
        })
    }
}

struct RedisReplyStream {
    conn: MultiplexedConnection,
    reply_key: String,
    timeout: Duration,
}

#[async_trait]
impl ReplyStream for RedisReplyStream {
    async fn next_reply(&mut self) -> TaskqResult<BrokerReply> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let raw: Option<Vec<u8>> = self
                .conn
                .lpop(&self.reply_key, None)
                .await
                .map_err(broker_error)?;
            if let Some(raw) = raw {
                return Ok(serde_json::from_slice(&raw)?);
            }
            if Instant::now() >= deadline {
                return Ok(BrokerReply::empty(ReturnCode::Timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Redis 代理的消费者
pub struct RedisWorker {
    broker: RedisBroker,
    functions: BTreeSet<String>,
}

impl RedisWorker {
    /// 按优先级从高到低排列的队列键
    fn queue_keys(&self) -> Vec<String> {
        Priority::ALL
            .into_iter()
            .flat_map(|priority| {
                self.functions
                    .iter()
                    .map(move |task| self.broker.queue_key(task, priority))
            })
            .collect()
    }

    async fn load_job(&self, handle: String) -> TaskqResult<Option<RedisJob>> {
        let mut conn = self.broker.conn.clone();
        let job_key = self.broker.job_key(&handle);
        let workload: Option<Vec<u8>> = conn
            .hget(&job_key, "workload")
            .await
            .map_err(broker_error)?;
        let fields: Vec<Option<String>> = conn
            .hget(&job_key, &["function", "unique", "priority", "foreground"])
            .await
            .map_err(broker_error)?;

        let (Some(workload), Some(function), Some(unique), Some(priority)) = (
            workload,
            fields[0].clone(),
            fields[1].clone(),
            fields[2].as_deref().and_then(|p| p.parse::<i64>().ok()).and_then(Priority::from_code),
        ) else {
            warn!("Job {} metadata expired, skipping", handle);
            return Ok(None);
        };

        let _: () = conn
            .hset(&job_key, "running", 1)
            .await
            .map_err(broker_error)?;

        Ok(Some(RedisJob {
            broker: Arc::new(self.broker.clone()),
            foreground: fields[3].as_deref() == Some("1"),
            handle,
            unique,
            function,
            workload,
            priority,
            return_code: ReturnCode::Success,
            finished: false,
        }))
    }
}

#[async_trait]
impl BrokerWorker for RedisWorker {
    async fn ping(&self) -> TaskqResult<bool> {
        BrokerClient::ping(&self.broker).await
    }

    fn register(&mut self, task: &str) {
        self.functions.insert(task.to_string());
    }

    fn registered(&self) -> Vec<String> {
        self.functions.iter().cloned().collect()
    }

    async fn grab_job(&mut self, timeout: Duration) -> TaskqResult<Option<Box<dyn BrokerJob>>> {
        let keys = self.queue_keys();
        let deadline = Instant::now() + timeout;
        let mut conn = self.broker.conn.clone();

        loop {
            for key in &keys {
                let handle: Option<String> = conn.rpop(key, None).await.map_err(broker_error)?;
                if let Some(handle) = handle {
                    if let Some(job) = self.load_job(handle).await? {
                        return Ok(Some(Box::new(job)));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

struct RedisJob {
    broker: Arc<RedisBroker>,
    handle: JobHandle,
    unique: String,
    function: String,
    workload: Vec<u8>,
    priority: Priority,
    foreground: bool,
    return_code: ReturnCode,
    finished: bool,
}

impl RedisJob {
    fn ensure_open(&self) -> TaskqResult<()> {
        if self.finished {
            Err(TaskqError::broker(format!("Job {} is already finished", self.handle)))
        } else {
            Ok(())
        }
    }

    async fn reply(&self, code: ReturnCode, data: Vec<u8>) -> TaskqResult<()> {
        if !self.foreground {
            return Ok(());
        }
        let payload = serde_json::to_vec(&BrokerReply::new(code, data))?;
        let reply_key = self.broker.reply_key(&self.handle);
        let mut conn = self.broker.conn.clone();
        let result: RedisResult<()> = redis::pipe()
            .rpush(&reply_key, payload)
            .ignore()
            .expire(&reply_key, JOB_TTL_SECONDS)
            .ignore()
            .query_async(&mut conn)
            .await;
        result.map_err(broker_error)
    }

    async fn finish(&mut self) -> TaskqResult<()> {
        self.finished = true;
        let mut conn = self.broker.conn.clone();
        let _: () = conn
            .del(self.broker.job_key(&self.handle))
            .await
            .map_err(broker_error)?;
        Ok(())
    }
}

#[async_trait]
impl BrokerJob for RedisJob {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn unique(&self) -> &str {
        &self.unique
    }

    fn function_name(&self) -> &str {
        &self.function
    }

    fn workload(&self) -> &[u8] {
        &self.workload
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn set_return(&mut self, code: ReturnCode) {
        self.return_code = code;
    }

    fn return_code(&self) -> ReturnCode {
        self.return_code
    }

    async fn send_data(&mut self, data: Vec<u8>) -> TaskqResult<()> {
        self.ensure_open()?;
        self.reply(ReturnCode::WorkData, data).await
    }

    async fn send_status(&mut self, numerator: u32, denominator: u32) -> TaskqResult<()> {
        self.ensure_open()?;
        let mut conn = self.broker.conn.clone();
        let _: () = conn
            .hset_multiple(
                self.broker.job_key(&self.handle),
                &[("numerator", numerator), ("denominator", denominator)],
            )
            .await
            .map_err(broker_error)?;
        self.reply(
            ReturnCode::WorkStatus {
                numerator,
                denominator,
            },
            Vec::new(),
        )
        .await
    }

    async fn send_complete(&mut self, result: Vec<u8>) -> TaskqResult<()> {
        self.ensure_open()?;
        self.reply(ReturnCode::Success, result).await?;
        self.finish().await
    }

    async fn send_exception(&mut self, data: Vec<u8>) -> TaskqResult<()> {
        self.ensure_open()?;
        self.reply(ReturnCode::WorkException, data).await
    }

    async fn send_fail(&mut self) -> TaskqResult<()> {
        self.ensure_open()?;
        self.reply(ReturnCode::WorkFail, Vec::new()).await?;
        self.finish().await
    }

    async fn release(&mut self) -> TaskqResult<()> {
        self.ensure_open()?;
        self.finished = true;
        let job_key = self.broker.job_key(&self.handle);
        let mut conn = self.broker.conn.clone();
        let result: RedisResult<()> = redis::pipe()
            .atomic()
            .hset(&job_key, "running", 0)
            .ignore()
            .lpush(self.broker.queue_key(&self.function, self.priority), &self.handle)
            .ignore()
            .query_async(&mut conn)
            .await;
        result.map_err(broker_error)?;
        warn!("Job {} released back to the queue", self.handle);
        Ok(())
    }
}
