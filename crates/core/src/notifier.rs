use tracing::error;

/// 运维告警通道
///
/// 连接层面的失败会把可读的错误信息推送到这里，除非调用方显式抑制。
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, message: &str);
}

impl<F> ErrorNotifier for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

/// 默认告警实现：写入 tracing 错误日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl ErrorNotifier for TracingNotifier {
    fn notify(&self, message: &str) {
        error!(target: "taskq::notify", "{}", message);
    }
}
