//! Task runner
//!
//! Drives one [`AsyncTask`] through its lifecycle: deferred start, optional
//! timeout race, cancellation and exactly-once completion.

use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::task::{
    AsyncTask, AsyncWorkerTask, OnFailure, OnSuccess, SyncTask, TaskFailure, TaskState,
};
use crate::error::{Result, RunnerError};

type SuccessCallback = Box<dyn FnOnce(Option<Value>) + Send>;
type FailureCallback = Box<dyn FnOnce(TaskFailure) + Send>;

/// Receives failure signals that arrive after the runner already completed
pub type EmergencyHandler = Arc<dyn Fn(TaskFailure) + Send + Sync>;

struct Callbacks {
    on_success: SuccessCallback,
    on_failure: FailureCallback,
}

/// Everything a finished runner lets go of
struct Released {
    task: Option<Box<dyn AsyncTask>>,
    callbacks: Option<Callbacks>,
}

struct RunnerState {
    state: TaskState,
    task: Option<Box<dyn AsyncTask>>,
    // Present until the first completion or kill; taking it is the one-shot guard.
    callbacks: Option<Callbacks>,
    timer: Option<JoinHandle<()>>,
    start: Option<JoinHandle<()>>,
    time_limit: Duration,
    emergency: EmergencyHandler,
}

impl RunnerState {
    fn cancel_pending(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(start) = self.start.take() {
            start.abort();
        }
    }

    fn release(&mut self) -> Released {
        self.cancel_pending();
        Released {
            task: self.task.take(),
            callbacks: self.callbacks.take(),
        }
    }

    /// Move to `terminal` if still attached, handing back the continuations
    fn finish(&mut self, terminal: TaskState) -> Option<Callbacks> {
        let released = self.release();
        let callbacks = released.callbacks?;
        self.state = terminal;
        Some(callbacks)
    }
}

struct Shared {
    inner: Mutex<RunnerState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunnerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn execute(self: &Arc<Self>, task: Box<dyn AsyncTask>) {
        {
            let mut inner = self.lock();
            if inner.callbacks.is_none() {
                return;
            }
            inner.state = TaskState::Working;
            inner.start = None;
        }

        let on_success = {
            let shared = Arc::clone(self);
            OnSuccess::new(move |result| shared.complete_success(result))
        };
        let on_failure = {
            let shared = Arc::clone(self);
            OnFailure::new(move |failure| shared.complete_failure(failure))
        };

        match panic::catch_unwind(AssertUnwindSafe(|| task.run(on_success, on_failure))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.complete_failure(TaskFailure::from_error(&err)),
            Err(payload) if payload.is::<Escalated>() => panic::resume_unwind(payload),
            Err(payload) => self.complete_failure(TaskFailure::from_panic(payload)),
        }
    }

    fn complete_success(&self, result: Option<Value>) {
        let callbacks = self.lock().finish(TaskState::FinishedSuccess);
        match callbacks {
            Some(callbacks) => (callbacks.on_success)(result),
            None => trace!("Dropping success signal for a finished runner"),
        }
    }

    fn complete_failure(&self, failure: TaskFailure) {
        let terminal = if failure.is_timeout() {
            TaskState::FinishedTimeout
        } else {
            TaskState::FinishedError
        };

        let (callbacks, emergency) = {
            let mut inner = self.lock();
            let callbacks = inner.finish(terminal);
            (callbacks, Arc::clone(&inner.emergency))
        };

        match callbacks {
            Some(callbacks) => (callbacks.on_failure)(failure),
            None if failure.is_timeout() => trace!("Dropping late timeout signal"),
            None => emergency(failure),
        }
    }

    fn expire(&self) {
        let limit = {
            let mut inner = self.lock();
            if inner.callbacks.is_none() {
                return;
            }
            inner.timer = None;
            inner.time_limit
        };

        warn!("Task exceeded its time limit of {}ms", limit.as_millis());
        self.complete_failure(TaskFailure::timeout(limit));
    }
}

/// Panic payload of the default emergency path; never turned back into a failure
struct Escalated(#[allow(dead_code)] TaskFailure);

/// Default emergency path: log, then re-raise in the signalling context
fn escalate(failure: TaskFailure) {
    error!(
        kind = ?failure.kind,
        "Unattributed task failure signalled after the runner completed: {}",
        failure
    );
    panic::panic_any(Escalated(failure));
}

/// Runner for a single asynchronous task
///
/// Exactly one of the two continuations fires, at most once. Must be started
/// from within a tokio runtime.
pub struct TaskRunner {
    shared: Arc<Shared>,
}

impl TaskRunner {
    /// Create a runner over `task`
    pub fn new<T, S, F>(task: T, on_success: S, on_failure: F) -> Self
    where
        T: AsyncTask,
        S: FnOnce(Option<Value>) + Send + 'static,
        F: FnOnce(TaskFailure) + Send + 'static,
    {
        let state = RunnerState {
            state: TaskState::New,
            task: Some(Box::new(task)),
            callbacks: Some(Callbacks {
                on_success: Box::new(on_success),
                on_failure: Box::new(on_failure),
            }),
            timer: None,
            start: None,
            time_limit: Duration::ZERO,
            emergency: Arc::new(escalate),
        };

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(state),
            }),
        }
    }

    /// Create a runner over a callback-style worker
    pub fn for_worker<W, S, F>(worker: W, on_success: S, on_failure: F) -> Self
    where
        W: FnOnce(OnSuccess, OnFailure) -> anyhow::Result<()> + Send + 'static,
        S: FnOnce(Option<Value>) + Send + 'static,
        F: FnOnce(TaskFailure) + Send + 'static,
    {
        Self::new(AsyncWorkerTask::new(worker), on_success, on_failure)
    }

    /// Create a runner over a synchronous procedure
    pub fn for_sync<P, S, F>(procedure: P, on_success: S, on_failure: F) -> Self
    where
        P: FnOnce() -> anyhow::Result<()> + Send + 'static,
        S: FnOnce(Option<Value>) + Send + 'static,
        F: FnOnce(TaskFailure) + Send + 'static,
    {
        Self::new(SyncTask::new(procedure), on_success, on_failure)
    }

    /// Replace the handler for failures signalled after completion
    pub fn with_emergency_handler(
        self,
        handler: impl Fn(TaskFailure) + Send + Sync + 'static,
    ) -> Self {
        self.shared.lock().emergency = Arc::new(handler);
        self
    }

    /// Schedule the task to run on the next scheduler turn
    ///
    /// A non-zero `time_limit` arms a timeout racing the task. Returns
    /// immediately; neither the task body nor the timer runs before this
    /// call returns.
    pub fn run_async(&self, time_limit: Duration) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| RunnerError::NoRuntime)?;

        let mut inner = self.shared.lock();
        let task = inner.task.take().ok_or(RunnerError::TaskMissing)?;

        inner.state = TaskState::New;
        inner.time_limit = time_limit;

        if !time_limit.is_zero() {
            let shared = Arc::clone(&self.shared);
            inner.timer = Some(handle.spawn(async move {
                tokio::time::sleep(time_limit).await;
                shared.expire();
            }));
        }

        let shared = Arc::clone(&self.shared);
        inner.start = Some(handle.spawn(async move {
            shared.execute(task);
        }));

        debug!("Task scheduled (time limit: {}ms)", time_limit.as_millis());
        Ok(())
    }

    /// Cancel the runner; no continuation fires afterwards
    pub fn kill(&self) {
        let released = {
            let mut inner = self.shared.lock();
            if inner.callbacks.is_none() {
                inner.cancel_pending();
                return;
            }
            inner.state = TaskState::FinishedKilled;
            inner.release()
        };

        debug!("Task runner killed");
        drop(released);
    }

    pub fn is_working(&self) -> bool {
        self.state() == TaskState::Working
    }

    pub fn state(&self) -> TaskState {
        self.shared.lock().state
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("TaskRunner")
            .field("state", &inner.state)
            .field("time_limit", &inner.time_limit)
            .field("attached", &inner.callbacks.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::task::{FailureDetail, FailureKind, FutureTask};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Outcomes {
        successes: AtomicUsize,
        failures: Mutex<Vec<TaskFailure>>,
    }

    impl Outcomes {
        fn successes(&self) -> usize {
            self.successes.load(Ordering::SeqCst)
        }

        fn failures(&self) -> Vec<TaskFailure> {
            self.failures.lock().unwrap().clone()
        }
    }

    fn runner_for<W>(worker: W) -> (TaskRunner, Arc<Outcomes>)
    where
        W: FnOnce(OnSuccess, OnFailure) -> anyhow::Result<()> + Send + 'static,
    {
        let outcomes = Arc::new(Outcomes::default());
        let on_success = {
            let outcomes = Arc::clone(&outcomes);
            move |_| {
                outcomes.successes.fetch_add(1, Ordering::SeqCst);
            }
        };
        let on_failure = {
            let outcomes = Arc::clone(&outcomes);
            move |failure| outcomes.failures.lock().unwrap().push(failure)
        };
        (TaskRunner::for_worker(worker, on_success, on_failure), outcomes)
    }

    /// Worker that parks its continuations for the test to fire later
    fn parked() -> (
        impl FnOnce(OnSuccess, OnFailure) -> anyhow::Result<()> + Send + 'static,
        Arc<Mutex<Option<(OnSuccess, OnFailure)>>>,
    ) {
        let slot = Arc::new(Mutex::new(None));
        let worker_slot = Arc::clone(&slot);
        let worker = move |s: OnSuccess, f: OnFailure| {
            *worker_slot.lock().unwrap() = Some((s, f));
            Ok(())
        };
        (worker, slot)
    }

    fn recording_emergency() -> (Arc<Mutex<Vec<TaskFailure>>>, impl Fn(TaskFailure) + Send + Sync) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler_log = Arc::clone(&log);
        (log, move |failure| handler_log.lock().unwrap().push(failure))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_fires_once() {
        let (runner, outcomes) = runner_for(|s, _f| {
            s.succeed(Some(json!({"ready": true})));
            s.done();
            Ok(())
        });

        runner.run_async(Duration::from_millis(1000)).unwrap();
        settle().await;

        assert_eq!(runner.state(), TaskState::FinishedSuccess);
        assert_eq!(outcomes.successes(), 1);
        assert!(outcomes.failures().is_empty());

        // The timer was cancelled: nothing fires past the limit either
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(runner.state(), TaskState::FinishedSuccess);
        assert!(outcomes.failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_body_runs_after_caller_returns() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let (runner, outcomes) = runner_for(move |s, _f| {
            flag.store(true, Ordering::SeqCst);
            s.done();
            Ok(())
        });

        runner.run_async(Duration::ZERO).unwrap();
        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(runner.state(), TaskState::New);
        assert_eq!(outcomes.successes(), 0);

        settle().await;
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(outcomes.successes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_success() {
        let (runner, outcomes) = runner_for(|s, _f| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                s.done();
            });
            Ok(())
        });

        runner.run_async(Duration::from_millis(1000)).unwrap();
        settle().await;
        assert!(runner.is_working());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!runner.is_working());
        assert_eq!(runner.state(), TaskState::FinishedSuccess);
        assert_eq!(outcomes.successes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_worker_never_signals() {
        let (worker, _slot) = parked();
        let (runner, outcomes) = runner_for(worker);

        runner.run_async(Duration::from_millis(100)).unwrap();
        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(runner.state(), TaskState::Working);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.state(), TaskState::FinishedTimeout);
        assert_eq!(outcomes.successes(), 0);

        let failures = outcomes.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Timeout);
        assert_eq!(
            failures[0].detail,
            Some(FailureDetail::Timeout { limit_ms: 100 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_signals_after_timeout() {
        let (worker, slot) = parked();
        let (runner, outcomes) = runner_for(worker);
        let (emergencies, handler) = recording_emergency();
        let runner = runner.with_emergency_handler(handler);

        runner.run_async(Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (s, f) = slot.lock().unwrap().take().unwrap();
        s.done();
        f.fail("too late");

        assert_eq!(outcomes.successes(), 0);
        assert_eq!(outcomes.failures().len(), 1);
        let escalated = emergencies.lock().unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].message, "too late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_before_completion() {
        let (worker, slot) = parked();
        let (runner, outcomes) = runner_for(worker);
        let (emergencies, handler) = recording_emergency();
        let runner = runner.with_emergency_handler(handler);

        runner.run_async(Duration::from_millis(100)).unwrap();
        settle().await;
        runner.kill();
        assert_eq!(runner.state(), TaskState::FinishedKilled);

        let (s, _f) = slot.lock().unwrap().take().unwrap();
        s.done();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(runner.state(), TaskState::FinishedKilled);
        assert_eq!(outcomes.successes(), 0);
        assert!(outcomes.failures().is_empty());
        assert!(emergencies.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_before_start_skips_body() {
        let started = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&started);
        let (runner, outcomes) = runner_for(move |s, _f| {
            flag.store(true, Ordering::SeqCst);
            s.done();
            Ok(())
        });

        runner.run_async(Duration::ZERO).unwrap();
        runner.kill();
        settle().await;

        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(runner.state(), TaskState::FinishedKilled);
        assert_eq!(outcomes.successes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_is_idempotent() {
        let (runner, outcomes) = runner_for(|s, _f| {
            s.done();
            Ok(())
        });

        runner.run_async(Duration::ZERO).unwrap();
        settle().await;
        runner.kill();
        runner.kill();

        assert_eq!(runner.state(), TaskState::FinishedSuccess);
        assert_eq!(outcomes.successes(), 1);

        let (worker, _slot) = parked();
        let (killed, outcomes) = runner_for(worker);
        killed.kill();
        killed.kill();
        assert_eq!(killed.state(), TaskState::FinishedKilled);
        assert_eq!(killed.run_async(Duration::ZERO), Err(RunnerError::TaskMissing));
        assert_eq!(outcomes.successes(), 0);
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let (worker, _slot) = parked();
        let (runner, _outcomes) = runner_for(worker);
        tokio_test::assert_ok!(runner.run_async(Duration::ZERO));
        assert_eq!(runner.run_async(Duration::ZERO), Err(RunnerError::TaskMissing));
    }

    #[test]
    fn test_run_outside_runtime_is_rejected() {
        let (worker, _slot) = parked();
        let (runner, _outcomes) = runner_for(worker);
        assert_eq!(runner.run_async(Duration::ZERO), Err(RunnerError::NoRuntime));
        assert_eq!(runner.state(), TaskState::New);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_from_run_is_failure() {
        let (runner, outcomes) = runner_for(|_s, _f| anyhow::bail!("cannot open fixture"));

        runner.run_async(Duration::ZERO).unwrap();
        settle().await;

        assert_eq!(runner.state(), TaskState::FinishedError);
        let failures = outcomes.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "cannot open fixture");
        assert!(matches!(failures[0].detail, Some(FailureDetail::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_in_run_is_failure() {
        let (runner, outcomes) = runner_for(|_s, _f| panic!("worker exploded"));

        runner.run_async(Duration::ZERO).unwrap();
        settle().await;

        assert_eq!(runner.state(), TaskState::FinishedError);
        let failures = outcomes.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].detail,
            Some(FailureDetail::Panic {
                payload: "worker exploded".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_success_is_escalated() {
        let (runner, outcomes) = runner_for(|s, _f| {
            s.done();
            anyhow::bail!("thrown after success")
        });
        let (emergencies, handler) = recording_emergency();
        let runner = runner.with_emergency_handler(handler);

        runner.run_async(Duration::ZERO).unwrap();
        settle().await;

        assert_eq!(runner.state(), TaskState::FinishedSuccess);
        assert_eq!(outcomes.successes(), 1);
        assert!(outcomes.failures().is_empty());
        assert_eq!(emergencies.lock().unwrap()[0].message, "thrown after success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_inside_run_is_not_repeated() {
        let (runner, outcomes) = runner_for(|s, f| {
            s.done();
            f.fail("late");
            Ok(())
        });
        let (emergencies, record) = recording_emergency();
        let runner = runner.with_emergency_handler(move |failure| {
            record(failure.clone());
            escalate(failure);
        });

        runner.run_async(Duration::ZERO).unwrap();
        settle().await;

        assert_eq!(runner.state(), TaskState::FinishedSuccess);
        assert_eq!(outcomes.successes(), 1);
        assert!(outcomes.failures().is_empty());
        let escalated = emergencies.lock().unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].message, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_procedure_runner() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let successes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&successes);

        let runner = TaskRunner::for_sync(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            move |result| {
                assert!(result.is_none());
                seen.fetch_add(1, Ordering::SeqCst);
            },
            |failure| panic!("unexpected failure: {failure}"),
        );

        runner.run_async(Duration::from_millis(10)).unwrap();
        settle().await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state(), TaskState::FinishedSuccess);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runners_complete_independently() {
        let delays = [30u64, 10, 20];
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let runners: Vec<_> = delays
            .iter()
            .map(|&delay| {
                let tx = tx.clone();
                let runner = TaskRunner::new(
                    FutureTask::new(async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        Ok(Some(json!(delay)))
                    }),
                    move |result| {
                        let _ = tx.send(result);
                    },
                    |failure| panic!("unexpected failure: {failure}"),
                );
                runner.run_async(Duration::from_millis(100)).unwrap();
                runner
            })
            .collect();
        drop(tx);

        let mut order = Vec::new();
        while let Some(result) = rx.recv().await {
            order.push(result.unwrap());
        }

        assert_eq!(order, vec![json!(10), json!(20), json!(30)]);
        assert!(runners
            .iter()
            .all(|r| r.state() == TaskState::FinishedSuccess));
    }
}
