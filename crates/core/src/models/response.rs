use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{NotAllowed, TaskqError};

/// 分发失败错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum ErrorCode {
    NotAllowedPriority = 1,
    NotAllowedTask = 2,
    BadException = 3,
    ServerDown = 4,
    SequenceError = 5,
    NotAllowedStoreType = 6,
    HolderError = 7,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ErrorCode::NotAllowedPriority),
            2 => Ok(ErrorCode::NotAllowedTask),
            3 => Ok(ErrorCode::BadException),
            4 => Ok(ErrorCode::ServerDown),
            5 => Ok(ErrorCode::SequenceError),
            6 => Ok(ErrorCode::NotAllowedStoreType),
            7 => Ok(ErrorCode::HolderError),
            other => Err(format!("unknown error code {other}")),
        }
    }
}

impl From<&NotAllowed> for ErrorCode {
    fn from(reason: &NotAllowed) -> Self {
        match reason {
            NotAllowed::Task(_) => ErrorCode::NotAllowedTask,
            NotAllowed::Priority(_) => ErrorCode::NotAllowedPriority,
            NotAllowed::StoreType(_) => ErrorCode::NotAllowedStoreType,
            NotAllowed::Driver(_) => ErrorCode::SequenceError,
        }
    }
}

impl From<&TaskqError> for ErrorCode {
    fn from(error: &TaskqError) -> Self {
        match error {
            TaskqError::NotAllowed(reason) => reason.into(),
            TaskqError::ServerDown(_) => ErrorCode::ServerDown,
            TaskqError::Sequence(_) | TaskqError::Database(_) | TaskqError::Connection(_) => {
                ErrorCode::SequenceError
            }
            TaskqError::Holder(_) => ErrorCode::HolderError,
            _ => ErrorCode::BadException,
        }
    }
}

/// 结构化错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

/// 暂存条目的身份标识，仅用于判断存在与移除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HolderKey(pub u64);

impl fmt::Display for HolderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "holder-{:016x}", self.0)
    }
}

/// 分发器所有公开操作的统一返回结构
///
/// 调用方必须先判断 `status`，不能假设其它字段存在。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_key: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_key: Option<HolderKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DispatchError>,
}

impl DispatchResponse {
    fn success() -> Self {
        Self {
            status: true,
            result: None,
            job_handle: None,
            store_key: None,
            holder_key: None,
            error: None,
        }
    }

    pub fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::success()
        }
    }

    pub fn with_job_handle(handle: impl Into<String>) -> Self {
        Self {
            job_handle: Some(handle.into()),
            ..Self::success()
        }
    }

    pub fn with_store_key(key: i64) -> Self {
        Self {
            store_key: Some(key),
            ..Self::success()
        }
    }

    pub fn with_holder_key(key: HolderKey) -> Self {
        Self {
            holder_key: Some(key),
            ..Self::success()
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: false,
            error: Some(DispatchError {
                code,
                message: message.into(),
            }),
            ..Self::success()
        }
    }

    pub fn from_not_allowed(reason: &NotAllowed) -> Self {
        Self::failure(reason.into(), reason.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.status
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_envelope_serialization() {
        let response = DispatchResponse::failure(ErrorCode::ServerDown, "servers are gone");
        assert!(!response.is_success());
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"status": false, "error": {"code": 4, "message": "servers are gone"}})
        );
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ErrorCode::from(&TaskqError::NotAllowed(NotAllowed::Driver("X".into()))),
            ErrorCode::SequenceError
        );
        assert_eq!(
            ErrorCode::from(&TaskqError::Holder("attach".into())),
            ErrorCode::HolderError
        );
        assert_eq!(
            ErrorCode::from(&TaskqError::broker("bad return code")),
            ErrorCode::BadException
        );
        assert_eq!(ErrorCode::try_from(6), Ok(ErrorCode::NotAllowedStoreType));
    }
}
