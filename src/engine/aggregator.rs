//! Result aggregation
//!
//! Every mutation of a run's [`RunResult`] goes through one aggregator, which
//! serializes completions arriving from concurrent set-ups and notifies the
//! observer after each change.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::models::{AsyncSetUpStatus, RunResult, TestRecord};

/// Called with the full current result after every change
pub type ResultObserver = Arc<dyn Fn(&RunResult) + Send + Sync>;

/// Replaceable observer slot shared between the engine and its aggregators
pub(crate) type ObserverSlot = Arc<RwLock<Option<ResultObserver>>>;

pub struct ResultAggregator {
    result: Mutex<RunResult>,
    observer: ObserverSlot,
}

impl ResultAggregator {
    pub(crate) fn new(observer: ObserverSlot) -> Self {
        Self {
            result: Mutex::new(RunResult::new()),
            observer,
        }
    }

    /// Aggregator with no observer attached
    pub fn detached() -> Self {
        Self::new(Arc::new(RwLock::new(None)))
    }

    fn lock(&self) -> MutexGuard<'_, RunResult> {
        self.result.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // The observer runs under the result lock so notifications never interleave.
    fn mutate(&self, change: impl FnOnce(&mut RunResult)) {
        let mut result = self.lock();
        change(&mut result);

        let observer = self
            .observer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer(&result);
        }
    }

    pub fn set_up_started(&self, group: &str) {
        debug!("Async set-up started for {}", group);
        self.mutate(|r| {
            r.async_set_up_by_group
                .insert(group.to_string(), AsyncSetUpStatus::setting_up());
        });
    }

    pub fn set_up_done(&self, group: &str) {
        debug!("Async set-up done for {}", group);
        self.mutate(|r| {
            r.async_set_up_by_group
                .insert(group.to_string(), AsyncSetUpStatus::done());
        });
    }

    /// Mark the set-up failed, then add the group-level error record
    pub fn set_up_failed(&self, group: &str, message: &str) {
        debug!("Async set-up failed for {}: {}", group, message);
        self.mutate(|r| {
            r.async_set_up_by_group
                .insert(group.to_string(), AsyncSetUpStatus::failed(message));
        });
        self.mutate(|r| r.errors.push(TestRecord::group_error(group, message)));
    }

    pub fn record_pass(&self, record: TestRecord) {
        self.mutate(|r| r.passes.push(record));
    }

    pub fn record_error(&self, record: TestRecord) {
        self.mutate(|r| r.errors.push(record));
    }

    /// Copy of the current result
    pub fn snapshot(&self) -> RunResult {
        self.lock().clone()
    }
}
