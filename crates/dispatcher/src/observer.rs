use taskq_infrastructure::{BrokerReply, ReturnCode};
use tracing::{debug, error, info};

/// 同步调用过程中的回复观察者
///
/// 每收到一条回复调用一次，返回 true 时停止等待。
pub trait CallObserver: Send {
    fn on_reply(&mut self, task: &str, reply: &BrokerReply) -> bool;
}

impl<F> CallObserver for F
where
    F: FnMut(&str, &BrokerReply) -> bool + Send,
{
    fn on_reply(&mut self, task: &str, reply: &BrokerReply) -> bool {
        self(task, reply)
    }
}

/// 默认观察者：数据和进度继续等待，失败或未知返回码立即停止
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl CallObserver for LoggingObserver {
    fn on_reply(&mut self, task: &str, reply: &BrokerReply) -> bool {
        match reply.code {
            ReturnCode::WorkData => {
                debug!("任务 {} 返回数据: {} bytes", task, reply.data.len());
                false
            }
            ReturnCode::WorkStatus {
                numerator,
                denominator,
            } => {
                info!("Status: {}/{} complete", numerator, denominator);
                false
            }
            ReturnCode::Success => false,
            ReturnCode::WorkFail => {
                error!("任务 {} Operation fail", task);
                true
            }
            other => {
                error!("任务 {} Return code: {:?}", task, other);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_observer_stops_on_failure_only() {
        let mut observer = LoggingObserver;
        let status = BrokerReply::empty(ReturnCode::WorkStatus {
            numerator: 1,
            denominator: 4,
        });
        assert!(!observer.on_reply("Resize", &status));
        assert!(!observer.on_reply("Resize", &BrokerReply::new(ReturnCode::WorkData, b"x".to_vec())));
        assert!(!observer.on_reply("Resize", &BrokerReply::empty(ReturnCode::Success)));
        assert!(observer.on_reply("Resize", &BrokerReply::empty(ReturnCode::WorkFail)));
        assert!(observer.on_reply("Resize", &BrokerReply::empty(ReturnCode::Timeout)));
        assert!(observer.on_reply("Resize", &BrokerReply::empty(ReturnCode::WorkException)));
    }
}
