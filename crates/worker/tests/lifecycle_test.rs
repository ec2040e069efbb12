use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use taskq_core::models::{EnvelopeConfig, Priority, WorkloadEnvelope};
use taskq_core::{ErrorNotifier, MessageLogger, TaskqError, TaskqResult};
use taskq_infrastructure::{BrokerClient, BrokerJob, BrokerReply, BrokerWorker, InMemoryBroker, ReturnCode};
use taskq_worker::{JobLifecycle, JobOutcome, ProcessExit, EXIT_CODE_RETRY};

#[derive(Clone, Default)]
struct RecordingExit {
    codes: Arc<Mutex<Vec<i32>>>,
}

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

/// 连接已断开的作业：所有回传都失败
struct DisconnectedJob {
    return_code: ReturnCode,
    released: bool,
}

#[async_trait]
impl BrokerJob for DisconnectedJob {
    fn handle(&self) -> &str {
        "H:lost:1"
    }

    fn unique(&self) -> &str {
        "lost-1"
    }

    fn function_name(&self) -> &str {
        "CheckTime"
    }

    fn workload(&self) -> &[u8] {
        b"{}"
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    fn set_return(&mut self, code: ReturnCode) {
        self.return_code = code;
    }

    fn return_code(&self) -> ReturnCode {
        self.return_code
    }

    async fn send_data(&mut self, _data: Vec<u8>) -> TaskqResult<()> {
        Err(TaskqError::ServerDown("connection reset".into()))
    }

    async fn send_status(&mut self, _numerator: u32, _denominator: u32) -> TaskqResult<()> {
        Err(TaskqError::ServerDown("connection reset".into()))
    }

    async fn send_complete(&mut self, _result: Vec<u8>) -> TaskqResult<()> {
        Err(TaskqError::ServerDown("connection reset".into()))
    }

    async fn send_exception(&mut self, _data: Vec<u8>) -> TaskqResult<()> {
        Err(TaskqError::ServerDown("connection reset".into()))
    }

    async fn send_fail(&mut self) -> TaskqResult<()> {
        Err(TaskqError::ServerDown("connection reset".into()))
    }

    async fn release(&mut self) -> TaskqResult<()> {
        self.released = true;
        Err(TaskqError::ServerDown("connection reset".into()))
    }
}

fn workload(params: serde_json::Value) -> Vec<u8> {
    WorkloadEnvelope::new(
        EnvelopeConfig {
            environment: "test".into(),
            servers: "127.0.0.1:4730".into(),
        },
        params,
        false,
    )
    .encode()
    .unwrap()
}

async fn grab(broker: &InMemoryBroker, task: &str) -> Box<dyn BrokerJob> {
    let mut worker = broker.worker();
    worker.register(task);
    worker
        .grab_job(Duration::from_millis(100))
        .await
        .unwrap()
        .expect("job should be queued")
}

#[tokio::test(start_paused = true)]
async fn test_retry_later_sleeps_reports_failure_and_exits() {
    let broker = InMemoryBroker::new();
    let handle = broker
        .call_async("CheckTime", workload(json!({"a": 0})), Priority::Normal)
        .await
        .unwrap();
    let mut job = grab(&broker, "CheckTime").await;

    let exit = RecordingExit::default();
    let lifecycle = JobLifecycle::new(MessageLogger::default()).with_exit(Arc::new(exit.clone()));

    let started = tokio::time::Instant::now();
    let outcome = lifecycle.retry_later(job.as_mut(), 5).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(outcome, JobOutcome::RetryPending);
    assert_eq!(job.return_code(), ReturnCode::WorkFail);
    assert_eq!(*exit.codes.lock().unwrap(), vec![EXIT_CODE_RETRY]);
    assert_ne!(EXIT_CODE_RETRY, 0);

    let pending = broker.pending_jobs();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].handle, handle);
}

#[tokio::test]
async fn test_mark_completed_sends_result() {
    let broker = InMemoryBroker::new();
    let mut stream = broker
        .call_sync("CheckTime", workload(json!({"a": 1})), Priority::High)
        .await
        .unwrap();
    let mut job = grab(&broker, "CheckTime").await;

    let lifecycle = JobLifecycle::new(MessageLogger::default());
    let envelope = lifecycle.decode_workload(&*job).unwrap();
    assert_eq!(envelope.params, json!({"a": 1}));
    assert!(!envelope.background);

    lifecycle.send_status(job.as_mut(), 1, 2).await.unwrap();
    let outcome = lifecycle
        .mark_completed(job.as_mut(), json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(job.return_code(), ReturnCode::Success);

    assert_eq!(
        stream.next_reply().await.unwrap().code,
        ReturnCode::WorkStatus {
            numerator: 1,
            denominator: 2
        }
    );
    assert_eq!(
        stream.next_reply().await.unwrap(),
        BrokerReply::new(ReturnCode::Success, br#"{"ok":true}"#.to_vec())
    );
    assert!(!broker.job_status(job.handle()).await.unwrap().known);
}

#[tokio::test]
async fn test_mark_failed_reports_exception_then_fail() {
    let broker = InMemoryBroker::new();
    let mut stream = broker
        .call_sync("CheckTime", workload(json!({})), Priority::Normal)
        .await
        .unwrap();
    let mut job = grab(&broker, "CheckTime").await;

    let exit = RecordingExit::default();
    let lifecycle = JobLifecycle::new(MessageLogger::default()).with_exit(Arc::new(exit.clone()));
    lifecycle.send_data(job.as_mut(), &json!({"step": 1})).await.unwrap();
    let outcome = lifecycle.mark_failed(job.as_mut()).await.unwrap();

    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(job.return_code(), ReturnCode::WorkFail);
    assert!(exit.codes.lock().unwrap().is_empty());

    assert_eq!(
        stream.next_reply().await.unwrap(),
        BrokerReply::new(ReturnCode::WorkData, br#"{"step":1}"#.to_vec())
    );
    assert_eq!(
        stream.next_reply().await.unwrap(),
        BrokerReply::new(ReturnCode::WorkException, b"WORK_FAIL".to_vec())
    );
    assert_eq!(stream.next_reply().await.unwrap().code, ReturnCode::WorkFail);
    assert!(broker.pending_jobs().is_empty());
}

#[tokio::test]
async fn test_finished_job_rejects_further_transitions() {
    let broker = InMemoryBroker::new();
    broker
        .call_async("CheckTime", workload(json!({})), Priority::Low)
        .await
        .unwrap();
    let mut job = grab(&broker, "CheckTime").await;

    let lifecycle = JobLifecycle::new(MessageLogger::default());
    lifecycle.mark_completed(job.as_mut(), json!(null)).await.unwrap();
    assert!(lifecycle.mark_failed(job.as_mut()).await.is_err());
}

#[tokio::test]
async fn test_retry_later_exits_even_when_broker_is_gone() {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let notifier: Arc<dyn ErrorNotifier> =
        Arc::new(move |message: &str| sink.lock().unwrap().push(message.to_string()));

    let exit = RecordingExit::default();
    let lifecycle = JobLifecycle::new(MessageLogger::default())
        .with_exit(Arc::new(exit.clone()))
        .with_notifier(notifier);

    let mut job = DisconnectedJob {
        return_code: ReturnCode::Success,
        released: false,
    };
    let outcome = lifecycle.retry_later(&mut job, 0).await.unwrap();

    assert_eq!(outcome, JobOutcome::RetryPending);
    assert_eq!(job.return_code, ReturnCode::WorkFail);
    assert!(job.released);
    assert_eq!(*exit.codes.lock().unwrap(), vec![EXIT_CODE_RETRY]);

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("lost-1"));
}
