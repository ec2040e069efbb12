use thiserror::Error;

/// 白名单拒绝原因
///
/// 任务名、存储驱动、优先级或存储类型不在允许列表中时返回，
/// 由分发器转换为结构化的失败结果，而不是向调用方抛出错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotAllowed {
    #[error("Task '{0}' is not in allowed tasks list")]
    Task(String),

    #[error("Sequence driver '{0}' is not in allowed drivers list")]
    Driver(String),

    #[error("Priority '{0}' is not in allowed priorities list")]
    Priority(i64),

    #[error("Store type '{0}' is not in allowed store types list")]
    StoreType(i64),
}

/// 任务分发系统错误类型定义
#[derive(Debug, Error)]
pub enum TaskqError {
    #[error("{0}")]
    NotAllowed(#[from] NotAllowed),

    #[error("消息代理错误: {0}")]
    Broker(String),

    #[error("消息代理不可达: {0}")]
    ServerDown(String),

    #[error("序列存储错误: {0}")]
    Sequence(String),

    #[error("连接错误: {0}")]
    Connection(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("暂存器错误: {0}")]
    Holder(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl TaskqError {
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker(message.into())
    }

    pub fn sequence(message: impl Into<String>) -> Self {
        Self::Sequence(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// 是否为连接层面的错误（代理不可达或存储后端连接失败）
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ServerDown(_) | Self::Connection(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

/// 统一的Result类型
pub type TaskqResult<T> = std::result::Result<T, TaskqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_allowed_messages() {
        assert_eq!(
            NotAllowed::Task("Resize".to_string()).to_string(),
            "Task 'Resize' is not in allowed tasks list"
        );
        assert_eq!(
            NotAllowed::Priority(9).to_string(),
            "Priority '9' is not in allowed priorities list"
        );
    }

    #[test]
    fn test_not_allowed_converts_into_taskq_error() {
        let err: TaskqError = NotAllowed::StoreType(4).into();
        assert!(matches!(err, TaskqError::NotAllowed(NotAllowed::StoreType(4))));
        assert!(!err.is_connection_error());
        assert!(TaskqError::ServerDown("down".into()).is_connection_error());
    }
}
