//! Error taxonomy shared by the task, archive and search layers.

use crate::types::{ErrorCode, ErrorInfo, TaskOutcome};

pub type TaskResult<T> = Result<T, TaskError>;

/// Failures a long-running operation can end with.
///
/// `Validation`, `Execution` and `ToolMissing` are captured and mirrored
/// into the task record. `Aborted` is handed back to the caller as-is so
/// "superseded" stays distinguishable from "failed". `Unknown` wraps a
/// panic or other unexpected fault caught at the orchestrator boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0}")]
    Execution(String),

    #[error("{0} not found on PATH")]
    ToolMissing(String),

    #[error("operation aborted")]
    Aborted,

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl TaskError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskError::Aborted)
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            TaskError::Validation(_) => ErrorCode::InvalidInput,
            TaskError::Execution(_) => ErrorCode::ExecutionFailed,
            TaskError::ToolMissing(_) => ErrorCode::DependencyMissing,
            TaskError::Aborted => ErrorCode::Aborted,
            TaskError::Unknown(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.error_code(),
            message: self.to_string(),
            details: serde_json::Value::Null,
        }
    }

    pub fn to_outcome(&self) -> TaskOutcome {
        TaskOutcome::failed(self.error_code(), self.to_string())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        TaskError::Execution(format!("io error: {}", e))
    }
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            let payload = e.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic with non-string payload".to_string());
            TaskError::Unknown(msg)
        } else {
            TaskError::Unknown(e.to_string())
        }
    }
}
