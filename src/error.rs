//! Library error types
//!
//! Contract violations raised by the task runner. Failures of the work itself
//! travel as [`TaskFailure`](crate::executor::TaskFailure) payloads instead.

use thiserror::Error;

/// Runner contract errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("Task can't be empty: runner has no attached task (already started, finished or killed)")]
    TaskMissing,

    #[error("No tokio runtime available to schedule the task")]
    NoRuntime,
}

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;
