use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use taskq_core::config::BrokerConfig;
use taskq_core::models::Priority;
use taskq_core::{TaskqError, TaskqResult};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{
    BrokerClient, BrokerConnector, BrokerJob, BrokerReply, BrokerWorker, JobHandle, JobStatus,
    ReplyStream, ReturnCode,
};

/// 进程内消息代理
///
/// 作业按 (优先级, 入队顺序) 排列，worker 总是先领取高优先级的作业。
/// 适用于嵌入式部署和测试；克隆得到的实例共享同一组队列。
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

struct BrokerState {
    host: String,
    /// (优先级编码, 入队序号) -> 作业
    queue: Mutex<BTreeMap<(i64, u64), QueuedJob>>,
    statuses: Mutex<HashMap<JobHandle, JobStatus>>,
    arrivals: Notify,
    sequence: AtomicU64,
    reachable: AtomicBool,
    client_timeout: Duration,
}

#[derive(Clone)]
struct QueuedJob {
    handle: JobHandle,
    unique: String,
    function: String,
    workload: Vec<u8>,
    priority: Priority,
    replies: Option<mpsc::UnboundedSender<BrokerReply>>,
}

/// 队列中等待领取的作业快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub handle: JobHandle,
    pub function: String,
    pub priority: Priority,
    pub workload: Vec<u8>,
    pub foreground: bool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(
            taskq_core::config::models::broker::DEFAULT_CLIENT_TIMEOUT_MS,
        ))
    }

    pub fn with_timeout(client_timeout: Duration) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            state: Arc::new(BrokerState {
                host,
                queue: Mutex::new(BTreeMap::new()),
                statuses: Mutex::new(HashMap::new()),
                arrivals: Notify::new(),
                sequence: AtomicU64::new(1),
                reachable: AtomicBool::new(true),
                client_timeout,
            }),
        }
    }

    /// 模拟代理上线或下线
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn pending_jobs(&self) -> Vec<PendingJob> {
        self.state
            .lock_queue()
            .values()
            .map(|job| PendingJob {
                handle: job.handle.clone(),
                function: job.function.clone(),
                priority: job.priority,
                workload: job.workload.clone(),
                foreground: job.replies.is_some(),
            })
            .collect()
    }

    pub fn worker(&self) -> InMemoryWorker {
        InMemoryWorker {
            state: self.state.clone(),
            functions: BTreeSet::new(),
        }
    }

    fn ensure_reachable(&self) -> TaskqResult<()> {
        if self.state.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TaskqError::ServerDown(
                "In-memory broker is not reachable".to_string(),
            ))
        }
    }

    fn submit(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
        replies: Option<mpsc::UnboundedSender<BrokerReply>>,
    ) -> JobHandle {
        let seq = self.state.sequence.fetch_add(1, Ordering::SeqCst);
        let handle = format!("H:{}:{}", self.state.host, seq);
        let job = QueuedJob {
            handle: handle.clone(),
            unique: uuid::Uuid::new_v4().to_string(),
            function: task.to_string(),
            workload,
            priority,
            replies,
        };
        self.state.enqueue(seq, job);
        debug!("Queued job {} for task {} with priority {}", handle, task, priority);
        handle
    }
}

impl BrokerState {
    fn lock_queue(&self) -> MutexGuard<'_, BTreeMap<(i64, u64), QueuedJob>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_statuses(&self) -> MutexGuard<'_, HashMap<JobHandle, JobStatus>> {
        self.statuses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enqueue(&self, seq: u64, job: QueuedJob) {
        self.lock_statuses().insert(
            job.handle.clone(),
            JobStatus {
                known: true,
                running: false,
                numerator: 0,
                denominator: 0,
            },
        );
        self.lock_queue().insert((job.priority.code(), seq), job);
        self.arrivals.notify_waiters();
    }

    fn take_for(&self, functions: &BTreeSet<String>) -> Option<QueuedJob> {
        let mut queue = self.lock_queue();
        let key = queue
            .iter()
            .find(|(_, job)| functions.contains(&job.function))
            .map(|(key, _)| *key)?;
        let job = queue.remove(&key)?;
        drop(queue);

        if let Some(status) = self.lock_statuses().get_mut(&job.handle) {
            status.running = true;
        }
        Some(job)
    }

    fn update_status(&self, handle: &str, numerator: u32, denominator: u32) {
        if let Some(status) = self.lock_statuses().get_mut(handle) {
            status.numerator = numerator;
            status.denominator = denominator;
        }
    }

    fn forget(&self, handle: &str) {
        self.lock_statuses().remove(handle);
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn ping(&self) -> TaskqResult<bool> {
        Ok(self.state.reachable.load(Ordering::SeqCst))
    }

    async fn call_sync(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<Box<dyn ReplyStream>> {
        self.ensure_reachable()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.submit(task, workload, priority, Some(sender));
        Ok(Box::new(InMemoryReplyStream {
            receiver,
            timeout: self.state.client_timeout,
        }))
    }

    async fn call_async(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<JobHandle> {
        self.ensure_reachable()?;
        Ok(self.submit(task, workload, priority, None))
    }

    async fn job_status(&self, handle: &str) -> TaskqResult<JobStatus> {
        self.ensure_reachable()?;
        Ok(self
            .state
            .lock_statuses()
            .get(handle)
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect_client(&self, _config: &BrokerConfig) -> TaskqResult<Arc<dyn BrokerClient>> {
        Ok(Arc::new(self.clone()))
    }

    async fn connect_worker(&self, _config: &BrokerConfig) -> TaskqResult<Box<dyn BrokerWorker>> {
        Ok(Box::new(self.worker()))
    }
}

struct InMemoryReplyStream {
    receiver: mpsc::UnboundedReceiver<BrokerReply>,
    timeout: Duration,
}

#[async_trait]
impl ReplyStream for InMemoryReplyStream {
    async fn next_reply(&mut self) -> TaskqResult<BrokerReply> {
        match tokio::time::timeout(self.timeout, self.receiver.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(TaskqError::broker("Job was dropped without a final reply")),
            Err(_) => Ok(BrokerReply::empty(ReturnCode::Timeout)),
        }
    }
}

/// 进程内代理的消费者
pub struct InMemoryWorker {
    state: Arc<BrokerState>,
    functions: BTreeSet<String>,
}

#[async_trait]
impl BrokerWorker for InMemoryWorker {
    async fn ping(&self) -> TaskqResult<bool> {
        Ok(self.state.reachable.load(Ordering::SeqCst))
    }

    fn register(&mut self, task: &str) {
        self.functions.insert(task.to_string());
    }

    fn registered(&self) -> Vec<String> {
        self.functions.iter().cloned().collect()
    }

    async fn grab_job(&mut self, timeout: Duration) -> TaskqResult<Option<Box<dyn BrokerJob>>> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.state.reachable.load(Ordering::SeqCst) {
                return Err(TaskqError::ServerDown(
                    "In-memory broker is not reachable".to_string(),
                ));
            }

            let notified = self.state.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.state.take_for(&self.functions) {
                return Ok(Some(Box::new(InMemoryJob {
                    state: self.state.clone(),
                    job,
                    return_code: ReturnCode::Success,
                    finished: false,
                })));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

struct InMemoryJob {
    state: Arc<BrokerState>,
    job: QueuedJob,
    return_code: ReturnCode,
    finished: bool,
}

impl InMemoryJob {
    fn reply(&self, code: ReturnCode, data: Vec<u8>) {
        if let Some(replies) = &self.job.replies {
            if replies.send(BrokerReply::new(code, data)).is_err() {
                debug!("Caller of job {} is gone, reply dropped", self.job.handle);
            }
        }
    }

    fn ensure_open(&self) -> TaskqResult<()> {
        if self.finished {
            Err(TaskqError::broker(format!(
                "Job {} is already finished",
                self.job.handle
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerJob for InMemoryJob {
    fn handle(&self) -> &str {
        &self.job.handle
    }

    fn unique(&self) -> &str {
        &self.job.unique
    }

    fn function_name(&self) -> &str {
        &self.job.function
    }

    fn workload(&self) -> &[u8] {
        &self.job.workload
    }

    fn priority(&self) -> Priority {
        self.job.priority
    }

    fn set_return(&mut self, code: ReturnCode) {
        self.return_code = code;
    }

    fn return_code(&self) -> ReturnCode {
        self.return_code
    }

    async fn send_data(&mut self, data: Vec<u8>) -> TaskqResult<()> {
        self.ensure_open()?;
        self.reply(ReturnCode::WorkData, data);
        Ok(())
    }

    async fn send_status(&mut self, numerator: u32, denominator: u32) -> TaskqResult<()> {
        self.ensure_open()?;
        self.state
            .update_status(&self.job.handle, numerator, denominator);
        self.reply(
            ReturnCode::WorkStatus {
                numerator,
                denominator,
            },
            Vec::new(),
        );
        Ok(())
    }

    async fn send_complete(&mut self, result: Vec<u8>) -> TaskqResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.state.forget(&self.job.handle);
        self.reply(ReturnCode::Success, result);
        Ok(())
    }

    async fn send_exception(&mut self, data: Vec<u8>) -> TaskqResult<()> {
        self.ensure_open()?;
        self.reply(ReturnCode::WorkException, data);
        Ok(())
    }

    async fn send_fail(&mut self) -> TaskqResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.state.forget(&self.job.handle);
        self.reply(ReturnCode::WorkFail, Vec::new());
        Ok(())
    }

    async fn release(&mut self) -> TaskqResult<()> {
        self.ensure_open()?;
        self.finished = true;
        let seq = self.state.sequence.fetch_add(1, Ordering::SeqCst);
        warn!("Job {} released back to the queue", self.job.handle);
        self.state.enqueue(seq, self.job.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_takes_highest_priority_first() {
        let broker = InMemoryBroker::new();
        broker.call_async("Mail", b"low".to_vec(), Priority::Low).await.unwrap();
        broker.call_async("Mail", b"high".to_vec(), Priority::High).await.unwrap();
        broker.call_async("Other", b"skip".to_vec(), Priority::High).await.unwrap();

        let mut worker = broker.worker();
        worker.register("Mail");

        let first = worker.grab_job(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.workload(), b"high");
        let second = worker.grab_job(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.workload(), b"low");
        assert!(worker.grab_job(Duration::from_millis(10)).await.unwrap().is_none());
        assert_eq!(broker.pending_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_call_streams_replies() {
        let broker = InMemoryBroker::new();
        let mut stream = broker
            .call_sync("Resize", b"{}".to_vec(), Priority::Normal)
            .await
            .unwrap();

        let mut worker = broker.worker();
        worker.register("Resize");
        let mut job = worker.grab_job(Duration::from_millis(10)).await.unwrap().unwrap();
        assert!(broker.job_status(job.handle()).await.unwrap().running);

        job.send_status(1, 2).await.unwrap();
        job.send_complete(b"done".to_vec()).await.unwrap();

        assert_eq!(
            stream.next_reply().await.unwrap().code,
            ReturnCode::WorkStatus {
                numerator: 1,
                denominator: 2
            }
        );
        let last = stream.next_reply().await.unwrap();
        assert_eq!(last, BrokerReply::new(ReturnCode::Success, b"done".to_vec()));
        assert!(!broker.job_status(job.handle()).await.unwrap().known);
        assert!(job.send_fail().await.is_err());
    }

    #[tokio::test]
    async fn test_released_job_is_redelivered() {
        let broker = InMemoryBroker::new();
        let handle = broker
            .call_async("CheckTime", b"{}".to_vec(), Priority::Normal)
            .await
            .unwrap();

        let mut worker = broker.worker();
        worker.register("CheckTime");
        let mut job = worker.grab_job(Duration::from_millis(10)).await.unwrap().unwrap();
        job.release().await.unwrap();

        let again = worker.grab_job(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(again.handle(), handle);
    }

    #[tokio::test]
    async fn test_unreachable_broker_rejects_calls() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        assert!(!BrokerClient::ping(&broker).await.unwrap());
        let result = broker.call_async("Mail", Vec::new(), Priority::High).await;
        assert!(matches!(result, Err(TaskqError::ServerDown(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_call_times_out_without_worker() {
        let broker = InMemoryBroker::with_timeout(Duration::from_millis(50));
        let mut stream = broker
            .call_sync("Resize", Vec::new(), Priority::Normal)
            .await
            .unwrap();
        assert_eq!(stream.next_reply().await.unwrap().code, ReturnCode::Timeout);
    }
}
