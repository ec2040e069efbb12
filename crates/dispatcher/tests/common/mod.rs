//! 分发器测试共用的模拟代理和配置

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use taskq_core::config::{BrokerConfig, SequenceConfig};
use taskq_core::models::{Priority, WorkloadEnvelope};
use taskq_core::{AppConfig, ErrorNotifier, TaskqError, TaskqResult};
use taskq_infrastructure::{
    BrokerClient, BrokerConnector, BrokerReply, BrokerWorker, JobHandle, JobStatus, ReplyStream,
    ReturnCode,
};

/// 代理收到的一次调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub task: String,
    pub priority: Priority,
    pub envelope: WorkloadEnvelope,
    pub foreground: bool,
}

#[derive(Default)]
struct RecordingState {
    calls: Vec<RecordedCall>,
    connects: usize,
    unreachable: bool,
    fail_async: bool,
    replies: VecDeque<BrokerReply>,
}

/// 记录所有调用的模拟代理
#[derive(Clone, Default)]
pub struct RecordingBroker {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn set_fail_async(&self, fail: bool) {
        self.state.lock().unwrap().fail_async = fail;
    }

    /// 预置同步调用依次返回的回复
    pub fn script_replies(&self, replies: Vec<BrokerReply>) {
        self.state.lock().unwrap().replies = replies.into();
    }

    fn record(&self, task: &str, workload: &[u8], priority: Priority, foreground: bool) {
        let envelope = WorkloadEnvelope::decode(workload).unwrap();
        self.state.lock().unwrap().calls.push(RecordedCall {
            task: task.to_string(),
            priority,
            envelope,
            foreground,
        });
    }
}

#[async_trait]
impl BrokerConnector for RecordingBroker {
    async fn connect_client(&self, _config: &BrokerConfig) -> TaskqResult<Arc<dyn BrokerClient>> {
        self.state.lock().unwrap().connects += 1;
        Ok(Arc::new(self.clone()))
    }

    async fn connect_worker(&self, _config: &BrokerConfig) -> TaskqResult<Box<dyn BrokerWorker>> {
        Err(TaskqError::Internal("recording broker has no workers".to_string()))
    }
}

#[async_trait]
impl BrokerClient for RecordingBroker {
    async fn ping(&self) -> TaskqResult<bool> {
        Ok(!self.state.lock().unwrap().unreachable)
    }

    async fn call_sync(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<Box<dyn ReplyStream>> {
        self.record(task, &workload, priority, true);
        let replies = std::mem::take(&mut self.state.lock().unwrap().replies);
        Ok(Box::new(ScriptedStream { replies }))
    }

    async fn call_async(
        &self,
        task: &str,
        workload: Vec<u8>,
        priority: Priority,
    ) -> TaskqResult<JobHandle> {
        if self.state.lock().unwrap().fail_async {
            return Err(TaskqError::broker("submission rejected"));
        }
        self.record(task, &workload, priority, false);
        Ok(format!("H:mock:{}", self.calls().len()))
    }

    async fn job_status(&self, handle: &str) -> TaskqResult<JobStatus> {
        Ok(JobStatus {
            known: handle.starts_with("H:mock:"),
            ..JobStatus::default()
        })
    }
}

struct ScriptedStream {
    replies: VecDeque<BrokerReply>,
}

#[async_trait]
impl ReplyStream for ScriptedStream {
    async fn next_reply(&mut self) -> TaskqResult<BrokerReply> {
        Ok(self
            .replies
            .pop_front()
            .unwrap_or_else(|| BrokerReply::empty(ReturnCode::Timeout)))
    }
}

/// 收集告警消息
#[derive(Clone, Default)]
pub struct CollectingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl CollectingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ErrorNotifier for CollectingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        environment: "test".to_string(),
        tasks: vec!["A".to_string(), "B".to_string(), "Resize".to_string()],
        ..AppConfig::default()
    }
}

pub fn memory_sequence() -> SequenceConfig {
    SequenceConfig {
        driver: "Memory".to_string(),
        ..SequenceConfig::default()
    }
}
