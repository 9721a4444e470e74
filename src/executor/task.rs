//! Task definitions
//!
//! A task is a unit of asynchronous work started through [`AsyncTask::run`],
//! which hands it a success and a failure continuation. The runner decides
//! which one counts.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle state of a task driven by a runner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    New,
    Working,
    FinishedSuccess,
    FinishedError,
    FinishedTimeout,
    FinishedKilled,
}

impl TaskState {
    /// Terminal states are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::FinishedSuccess
                | TaskState::FinishedError
                | TaskState::FinishedTimeout
                | TaskState::FinishedKilled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::New => write!(f, "NEW"),
            TaskState::Working => write!(f, "WORKING"),
            TaskState::FinishedSuccess => write!(f, "FINISHED_SUCCESS"),
            TaskState::FinishedError => write!(f, "FINISHED_ERROR"),
            TaskState::FinishedTimeout => write!(f, "FINISHED_TIMEOUT"),
            TaskState::FinishedKilled => write!(f, "FINISHED_KILLED"),
        }
    }
}

/// Why a task failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Error,
    Timeout,
}

/// Structured detail attached to a failure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureDetail {
    /// Arbitrary detail supplied by the worker
    Value { value: Value },
    /// Error returned while starting the task
    Error { chain: String },
    /// Panic raised while starting the task
    Panic { payload: String },
    /// Time limit that expired
    Timeout { limit_ms: u64 },
}

/// Failure payload delivered to a runner's failure continuation
#[derive(Error, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[error("{}", display_message(.message))]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    pub detail: Option<FailureDetail>,
}

fn display_message(message: &str) -> &str {
    if message.is_empty() {
        "Unknown error"
    } else {
        message
    }
}

impl TaskFailure {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
            detail: None,
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        let limit_ms = limit.as_millis() as u64;
        Self {
            kind: FailureKind::Timeout,
            message: format!("[timeout] {limit_ms} milliseconds."),
            detail: Some(FailureDetail::Timeout { limit_ms }),
        }
    }

    /// Failure carrying an error returned from `run`
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self::error(err.to_string()).with_detail(FailureDetail::Error {
            chain: format!("{err:#}"),
        })
    }

    /// Failure carrying a panic payload caught while invoking `run`
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = panic_message(payload.as_ref());
        Self::error(message.clone()).with_detail(FailureDetail::Panic { payload: message })
    }

    pub fn with_detail(mut self, detail: FailureDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Success continuation handed to a running task
#[derive(Clone)]
pub struct OnSuccess {
    callback: Arc<dyn Fn(Option<Value>) + Send + Sync>,
}

impl OnSuccess {
    pub fn new(callback: impl Fn(Option<Value>) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Report success with an optional result value
    pub fn succeed(&self, result: Option<Value>) {
        (self.callback)(result)
    }

    /// Report success without a result
    pub fn done(&self) {
        self.succeed(None)
    }
}

impl fmt::Debug for OnSuccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnSuccess")
    }
}

/// Failure continuation handed to a running task
#[derive(Clone)]
pub struct OnFailure {
    callback: Arc<dyn Fn(TaskFailure) + Send + Sync>,
}

impl OnFailure {
    pub fn new(callback: impl Fn(TaskFailure) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Report failure with a message
    pub fn fail(&self, message: impl Into<String>) {
        self.fail_with(TaskFailure::error(message))
    }

    /// Report failure with a message and structured detail
    pub fn fail_with_value(&self, message: impl Into<String>, value: Value) {
        self.fail_with(TaskFailure::error(message).with_detail(FailureDetail::Value { value }))
    }

    pub fn fail_with(&self, failure: TaskFailure) {
        (self.callback)(failure)
    }
}

impl fmt::Debug for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnFailure")
    }
}

/// Unit of asynchronous work
///
/// `run` is invoked at most once, on a scheduler turn after the runner was
/// started. Returning `Err` (or panicking) counts as a failure completion.
pub trait AsyncTask: Send + 'static {
    fn run(self: Box<Self>, on_success: OnSuccess, on_failure: OnFailure) -> anyhow::Result<()>;
}

/// Callback-style worker adapter
pub struct AsyncWorkerTask<F> {
    worker: F,
}

impl<F> AsyncWorkerTask<F>
where
    F: FnOnce(OnSuccess, OnFailure) -> anyhow::Result<()> + Send + 'static,
{
    pub fn new(worker: F) -> Self {
        Self { worker }
    }
}

impl<F> AsyncTask for AsyncWorkerTask<F>
where
    F: FnOnce(OnSuccess, OnFailure) -> anyhow::Result<()> + Send + 'static,
{
    fn run(self: Box<Self>, on_success: OnSuccess, on_failure: OnFailure) -> anyhow::Result<()> {
        (self.worker)(on_success, on_failure)
    }
}

/// Synchronous procedure adapter; succeeds once the procedure returns `Ok`
pub struct SyncTask<F> {
    procedure: F,
}

impl<F> SyncTask<F>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    pub fn new(procedure: F) -> Self {
        Self { procedure }
    }
}

impl<F> AsyncTask for SyncTask<F>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    fn run(self: Box<Self>, on_success: OnSuccess, _on_failure: OnFailure) -> anyhow::Result<()> {
        (self.procedure)()?;
        on_success.done();
        Ok(())
    }
}

/// Future adapter; the future is spawned when the task runs
pub struct FutureTask {
    future: BoxFuture<'static, anyhow::Result<Option<Value>>>,
}

impl FutureTask {
    pub fn new<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        Self {
            future: future.boxed(),
        }
    }
}

impl AsyncTask for FutureTask {
    fn run(self: Box<Self>, on_success: OnSuccess, on_failure: OnFailure) -> anyhow::Result<()> {
        let future = self.future;
        tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(result)) => on_success.succeed(result),
                Ok(Err(err)) => on_failure.fail_with(TaskFailure::from_error(&err)),
                Err(payload) => on_failure.fail_with(TaskFailure::from_panic(payload)),
            }
        });
        Ok(())
    }
}
