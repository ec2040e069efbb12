use async_trait::async_trait;
use serde_json::{json, Value};
use taskq_core::{TaskqError, TaskqResult};
use taskq_infrastructure::BrokerJob;
use tracing::debug;

use crate::handler::TaskHandler;
use crate::lifecycle::{JobLifecycle, JobOutcome};

/// 截止时间已过时的重试等待（秒）
const RETRY_DELAY_SECONDS: u64 = 5;

/// 示例任务：参数 `a` 为 unix 时间戳，当前时间早于它时完成，否则稍后重试
///
/// 暂存器批量投递时参数为数组，此时要求每个时间戳都未到期。
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckTimeTask;

impl CheckTimeTask {
    pub const NAME: &'static str = "CheckTime";

    fn deadlines(params: &Value) -> TaskqResult<Vec<i64>> {
        let items: Vec<&Value> = match params {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        items
            .into_iter()
            .map(|item| {
                item.get("a").and_then(Value::as_i64).ok_or_else(|| {
                    TaskqError::Internal(format!("CheckTime expects integer param 'a', got {item}"))
                })
            })
            .collect()
    }
}

#[async_trait]
impl TaskHandler for CheckTimeTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn execute(
        &self,
        job: &mut dyn BrokerJob,
        lifecycle: &JobLifecycle,
    ) -> TaskqResult<JobOutcome> {
        let envelope = lifecycle.decode_workload(job)?;
        let deadlines = Self::deadlines(&envelope.params)?;
        let now = chrono::Utc::now().timestamp();
        debug!("CheckTime: now={}, deadlines={:?}", now, deadlines);

        if deadlines.iter().all(|deadline| now < *deadline) {
            lifecycle
                .mark_completed(job, json!({ "checked": deadlines.len(), "now": now }))
                .await
        } else {
            lifecycle.retry_later(job, RETRY_DELAY_SECONDS).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadlines_from_object_and_batch() {
        assert_eq!(CheckTimeTask::deadlines(&json!({"a": 10})).unwrap(), vec![10]);
        assert_eq!(
            CheckTimeTask::deadlines(&json!([{"a": 1}, {"a": 2}])).unwrap(),
            vec![1, 2]
        );
        assert!(CheckTimeTask::deadlines(&json!({"b": 1})).is_err());
        assert!(CheckTimeTask::deadlines(&json!([{"a": "soon"}])).is_err());
    }
}
