//! Test orchestration engine
//!
//! Holds the registered groups, starts their async set-ups through
//! [`TaskRunner`]s, runs the selected tests and feeds every outcome into a
//! per-run [`ResultAggregator`].

mod aggregator;
mod group;
mod selection;

pub use aggregator::{ResultAggregator, ResultObserver};
pub use group::{
    is_reserved_name, AsyncSetUp, ParameterSet, TestGroup, TestMember, TestTable,
    DEFAULT_PRIVATE_MEMBER_PREFIX, RESERVED_MEMBER_NAMES,
};
pub use selection::{RunAll, SelectionFilter, Selector};

use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::RunnerError;
use crate::executor::{panic_message, OnFailure, OnSuccess, TaskFailure, TaskRunner};
use crate::models::{RunResult, TestRecord};
use crate::utils::timer::Timer;
use aggregator::ObserverSlot;
use group::TestBody;

/// Per-group state shared by everything that reports for that group
struct RunContext {
    group_name: String,
    filter: Arc<dyn SelectionFilter>,
    aggregator: Arc<ResultAggregator>,
    private_member_prefix: Arc<str>,
}

impl RunContext {
    fn report(&self, test_name: &str, index: Option<usize>, timer: Timer, outcome: Result<(), String>) {
        let duration_ms = timer.stop().as_millis() as u64;
        match outcome {
            Ok(()) => {
                debug!("{}/{} passed", self.group_name, test_name);
                self.aggregator.record_pass(
                    TestRecord::pass(&self.group_name, test_name, index).with_duration_ms(duration_ms),
                );
            }
            Err(message) => {
                info!("{}/{} failed: {}", self.group_name, test_name, message);
                self.aggregator.record_error(
                    TestRecord::error(&self.group_name, test_name, index, message)
                        .with_duration_ms(duration_ms),
                );
            }
        }
    }
}

fn is_runnable_member(name: &str, private_member_prefix: &str) -> bool {
    !is_reserved_name(name)
        && (private_member_prefix.is_empty() || !name.starts_with(private_member_prefix))
}

/// Run one lifecycle step, turning errors and panics into a message
fn guarded(step: impl FnOnce() -> anyhow::Result<()>) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// `set_up`, body, `tear_down`; the first failure wins
fn run_test<G: TestGroup>(
    group: &mut G,
    body: impl FnOnce(&mut G) -> anyhow::Result<()>,
) -> Result<(), String> {
    let prepared = guarded(|| group.set_up());
    let outcome = match prepared {
        Ok(()) => guarded(|| body(group)),
        Err(message) => Err(message),
    };
    let torn_down = guarded(|| group.tear_down());
    outcome.and(torn_down)
}

/// Type-erased view of a registered group
trait GroupRunner: Send + Sync {
    fn members(&self) -> Vec<(String, Option<usize>)>;

    /// `Some` for groups registered with an async set-up
    fn async_set_up_time_limit(&self) -> Option<Duration>;

    fn async_set_up(&self, on_success: OnSuccess, on_failure: OnFailure) -> anyhow::Result<()>;

    fn execute(&self, ctx: &RunContext);
}

struct AsyncHooks<G> {
    set_up: fn(&mut G, OnSuccess, OnFailure) -> anyhow::Result<()>,
    time_limit: fn(&G) -> Duration,
}

struct GroupSlot<G> {
    group: Mutex<G>,
    table: TestTable<G>,
    hooks: Option<AsyncHooks<G>>,
}

impl<G: TestGroup> GroupSlot<G> {
    fn new(group: G, hooks: Option<AsyncHooks<G>>) -> Self {
        let table = group.tests();
        Self {
            group: Mutex::new(group),
            table,
            hooks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, G> {
        self.group.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<G: TestGroup> GroupRunner for GroupSlot<G> {
    fn members(&self) -> Vec<(String, Option<usize>)> {
        self.table
            .members()
            .iter()
            .map(|m| (m.name().to_string(), m.parameter_sets().map(|p| p.len())))
            .collect()
    }

    fn async_set_up_time_limit(&self) -> Option<Duration> {
        let hooks = self.hooks.as_ref()?;
        Some((hooks.time_limit)(&self.lock()))
    }

    fn async_set_up(&self, on_success: OnSuccess, on_failure: OnFailure) -> anyhow::Result<()> {
        match &self.hooks {
            Some(hooks) => (hooks.set_up)(&mut self.lock(), on_success, on_failure),
            None => {
                on_success.done();
                Ok(())
            }
        }
    }

    fn execute(&self, ctx: &RunContext) {
        let mut group = self.lock();

        for member in self.table.members() {
            let name = member.name();
            if !is_runnable_member(name, &ctx.private_member_prefix) {
                continue;
            }

            match &member.body {
                TestBody::Plain(body) => {
                    if !ctx.filter.is_test_active(name) {
                        continue;
                    }
                    let timer = Timer::start(format!("{}/{}", ctx.group_name, name));
                    let outcome = run_test(&mut *group, |g| body(g));
                    ctx.report(name, None, timer, outcome);
                }
                TestBody::Parameterized {
                    body,
                    parameter_sets,
                } => {
                    for (index, arguments) in parameter_sets.iter().enumerate() {
                        if !ctx.filter.is_parameter_set_active(index) {
                            continue;
                        }
                        if !ctx.filter.is_test_active(name) {
                            break;
                        }
                        let timer = Timer::start(format!("{}/{}({})", ctx.group_name, name, index));
                        let outcome = run_test(&mut *group, |g| body(g, arguments.as_slice()));
                        ctx.report(name, Some(index), timer, outcome);
                    }
                }
            }
        }
    }
}

struct Registration {
    name: String,
    group: Arc<dyn GroupRunner>,
}

/// A runnable test as seen by [`TestEngine::list_tests`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TestEntry {
    pub group: String,
    pub test: String,
    /// Number of parameter sets for parameterized tests
    pub parameter_sets: Option<usize>,
    pub async_set_up: bool,
}

impl fmt::Display for TestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.test)?;
        if let Some(count) = self.parameter_sets {
            write!(f, " ({count} parameter sets)")?;
        }
        Ok(())
    }
}

/// Handle on one run's results
pub struct RunHandle {
    aggregator: Arc<ResultAggregator>,
    // Closed once every pending async group has finished or was dropped.
    done: mpsc::Receiver<()>,
}

impl RunHandle {
    /// Current results; async groups may still be setting up
    pub fn result(&self) -> RunResult {
        self.aggregator.snapshot()
    }

    /// Wait until every async set-up has completed and its tests ran
    pub async fn finished(mut self) -> RunResult {
        while self.done.recv().await.is_some() {}
        self.aggregator.snapshot()
    }
}

/// Test orchestration engine
pub struct TestEngine {
    groups: Vec<Registration>,
    private_member_prefix: Arc<str>,
    default_set_up_time_limit: Duration,
    selector: Selector,
    observer: ObserverSlot,
    pending: Mutex<Vec<TaskRunner>>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            private_member_prefix: Arc::from(DEFAULT_PRIVATE_MEMBER_PREFIX),
            default_set_up_time_limit: Duration::ZERO,
            selector: Selector::default(),
            observer: Arc::new(RwLock::new(None)),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            private_member_prefix: Arc::from(config.private_member_prefix.as_str()),
            default_set_up_time_limit: config.default_set_up_time_limit(),
            selector: config.selector(),
            ..Self::new()
        }
    }

    /// Members whose names start with `prefix` are never run; empty disables
    pub fn with_private_member_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.private_member_prefix = Arc::from(prefix.as_ref());
        self
    }

    /// Limit applied to async groups that declare no limit of their own
    pub fn with_default_set_up_time_limit(mut self, limit: Duration) -> Self {
        self.default_set_up_time_limit = limit;
        self
    }

    /// Selection used by [`TestEngine::run_selected`]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Register a group whose tests run synchronously inside `run`
    pub fn add_group<G: TestGroup>(&mut self, name: impl Into<String>, group: G) -> &mut Self {
        self.register(name.into(), GroupSlot::new(group, None))
    }

    /// Register a group whose tests run once its async set-up succeeds
    pub fn add_async_group<G: AsyncSetUp>(&mut self, name: impl Into<String>, group: G) -> &mut Self {
        let hooks = AsyncHooks {
            set_up: <G as AsyncSetUp>::async_set_up,
            time_limit: <G as AsyncSetUp>::set_up_time_limit,
        };
        self.register(name.into(), GroupSlot::new(group, Some(hooks)))
    }

    fn register<G: TestGroup>(&mut self, name: String, slot: GroupSlot<G>) -> &mut Self {
        debug!("Registered group {} ({} tests)", name, slot.table.len());
        self.groups.push(Registration {
            name,
            group: Arc::new(slot),
        });
        self
    }

    /// Replace the observer notified after every result change
    ///
    /// The observer runs while the result lock is held: it must not call
    /// [`RunHandle::result`] or other engine methods, or it deadlocks.
    pub fn set_on_result_change(&self, observer: impl Fn(&RunResult) + Send + Sync + 'static) {
        let observer: ResultObserver = Arc::new(observer);
        *self
            .observer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(observer);
    }

    pub fn clear_on_result_change(&self) {
        *self
            .observer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Run with the configured selection
    pub fn run_selected(&self) -> RunHandle {
        self.run(self.selector.clone())
    }

    /// Run every selected group
    ///
    /// Plain groups have finished when this returns. Async groups only have
    /// their set-up scheduled; await [`RunHandle::finished`] for those.
    /// Runners still pending from a previous run are killed first.
    pub fn run(&self, filter: impl SelectionFilter + 'static) -> RunHandle {
        self.kill();

        let filter: Arc<dyn SelectionFilter> = Arc::new(filter);
        let aggregator = Arc::new(ResultAggregator::new(Arc::clone(&self.observer)));
        let (done_tx, done_rx) = mpsc::channel(1);
        let mut pending = Vec::new();

        info!("Starting run over {} groups", self.groups.len());

        for registration in &self.groups {
            if !filter.is_group_active(&registration.name) {
                debug!("Skipping unselected group {}", registration.name);
                continue;
            }

            let ctx = RunContext {
                group_name: registration.name.clone(),
                filter: Arc::clone(&filter),
                aggregator: Arc::clone(&aggregator),
                private_member_prefix: Arc::clone(&self.private_member_prefix),
            };

            match registration.group.async_set_up_time_limit() {
                None => {
                    info!("Running group {}", registration.name);
                    registration.group.execute(&ctx);
                }
                Some(limit) => {
                    let limit = if limit.is_zero() {
                        self.default_set_up_time_limit
                    } else {
                        limit
                    };
                    aggregator.set_up_started(&registration.name);
                    if let Some(runner) =
                        Self::start_set_up(&registration.group, ctx, limit, done_tx.clone())
                    {
                        pending.push(runner);
                    }
                }
            }
        }

        *self.lock_pending() = pending;

        RunHandle {
            aggregator,
            done: done_rx,
        }
    }

    fn start_set_up(
        group: &Arc<dyn GroupRunner>,
        ctx: RunContext,
        limit: Duration,
        done: mpsc::Sender<()>,
    ) -> Option<TaskRunner> {
        // Tests of an async group run on their own task so a set-up that
        // signals synchronously never re-enters the group lock.
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                let message = RunnerError::NoRuntime.to_string();
                warn!("Cannot set up {}: {}", ctx.group_name, message);
                ctx.aggregator.set_up_failed(&ctx.group_name, &message);
                return None;
            }
        };

        let ctx = Arc::new(ctx);

        let on_success = {
            let ctx = Arc::clone(&ctx);
            let group = Arc::clone(group);
            let done = done.clone();
            move |_result| {
                ctx.aggregator.set_up_done(&ctx.group_name);
                runtime.spawn(async move {
                    info!("Running group {}", ctx.group_name);
                    group.execute(&ctx);
                    drop(done);
                });
            }
        };

        let on_failure = {
            let ctx = Arc::clone(&ctx);
            move |failure: TaskFailure| {
                warn!("Async set-up of {} failed: {}", ctx.group_name, failure);
                ctx.aggregator.set_up_failed(&ctx.group_name, &failure.to_string());
                drop(done);
            }
        };

        let worker_group = Arc::clone(group);
        let runner = TaskRunner::for_worker(
            move |on_success, on_failure| worker_group.async_set_up(on_success, on_failure),
            on_success,
            on_failure,
        );

        match runner.run_async(limit) {
            Ok(()) => Some(runner),
            Err(err) => {
                ctx.aggregator.set_up_failed(&ctx.group_name, &err.to_string());
                None
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<TaskRunner>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancel every async set-up still pending
    pub fn kill(&self) {
        let runners = std::mem::take(&mut *self.lock_pending());
        let live = runners.iter().filter(|r| !r.state().is_terminal()).count();
        if live > 0 {
            debug!("Killing {} pending set-up runners", live);
        }
        for runner in &runners {
            runner.kill();
        }
    }

    /// Runnable tests in registration and declaration order
    pub fn list_tests(&self) -> Vec<TestEntry> {
        let prefix: &str = &self.private_member_prefix;
        self.groups
            .iter()
            .flat_map(move |registration| {
                let async_set_up = registration.group.async_set_up_time_limit().is_some();
                registration
                    .group
                    .members()
                    .into_iter()
                    .filter(move |(name, _)| is_runnable_member(name, prefix))
                    .map(move |(test, parameter_sets)| TestEntry {
                        group: registration.name.clone(),
                        test,
                        parameter_sets,
                        async_set_up,
                    })
            })
            .collect()
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|r| r.name.as_str()).collect()
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestEngine")
            .field("groups", &self.group_names())
            .field("private_member_prefix", &self.private_member_prefix)
            .field("selector", &self.selector)
            .finish()
    }
}
