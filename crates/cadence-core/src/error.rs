//! Cadence error types.

use crate::types::TaskId;

/// Every failure the engine can report.
///
/// Lifecycle operations (`start_task`, `stop_task`, ...) return these to their
/// caller. Failures inside the asynchronous dispatch path never escape: they are
/// converted into an execution log with outcome `failure`.
#[derive(Debug, thiserror::Error)]
pub enum CadenceError {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {0} is not enabled")]
    NotEnabled(TaskId),

    #[error("no executor found for task type: {0}")]
    ExecutorNotFound(String),

    #[error("function not found: {0}")]
    FunctionNotFound(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("invalid task params: {0}")]
    InvalidParams(String),

    #[error("execution failed: {0}")]
    Execution(String),

    /// `output` holds whatever the work produced before the deadline.
    #[error(
        "{what} timed out after {secs}s{}",
        .output.as_deref().map(|o| format!(", output: {o}")).unwrap_or_default()
    )]
    Timeout {
        what: String,
        secs: u64,
        output: Option<String>,
    },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CadenceError {
    /// Whether this error came from a deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CadenceError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
