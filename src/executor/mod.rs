//! Task execution engine
//!
//! Provides the task abstraction and the runner that schedules one task with
//! an optional time limit.

mod runner;
mod task;

pub use runner::{EmergencyHandler, TaskRunner};
pub use task::{
    panic_message, AsyncTask, AsyncWorkerTask, FailureDetail, FailureKind, FutureTask, OnFailure,
    OnSuccess, SyncTask, TaskFailure, TaskState,
};
