use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info};

/// 关闭信号管理器
///
/// 订阅者拿到的是 `watch::Receiver<bool>`，值变为 `true` 即应停止。
pub struct ShutdownManager {
    shutdown_tx: watch::Sender<bool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        if *self.shutdown_tx.borrow() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发关闭，订阅者 {} 个", self.shutdown_tx.receiver_count());
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_notifies_subscribers_once() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        assert!(!manager.is_shutdown());

        manager.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        manager.shutdown();
        assert!(manager.is_shutdown());
        // 迟到的订阅者也能看到已关闭
        assert!(*manager.subscribe().borrow());
    }
}
