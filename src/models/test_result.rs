//! Test result models
//!
//! Defines test records, async set-up status and the per-run result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Message recorded for a passing test
pub const PASS_MESSAGE: &str = "OK";

/// Outcome of one executed test, or of a group whose async set-up failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub group_name: String,
    /// `None` for group-level records
    pub test_name: Option<String>,
    pub parameter_set_index: Option<usize>,
    pub message: String,
    pub duration_ms: u64,
}

impl TestRecord {
    pub fn pass(
        group_name: impl Into<String>,
        test_name: impl Into<String>,
        parameter_set_index: Option<usize>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            test_name: Some(test_name.into()),
            parameter_set_index,
            message: PASS_MESSAGE.to_string(),
            duration_ms: 0,
        }
    }

    pub fn error(
        group_name: impl Into<String>,
        test_name: impl Into<String>,
        parameter_set_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            test_name: Some(test_name.into()),
            parameter_set_index,
            message: message.into(),
            duration_ms: 0,
        }
    }

    /// Group-level error, used when async set-up fails
    pub fn group_error(group_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            test_name: None,
            parameter_set_index: None,
            message: message.into(),
            duration_ms: 0,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Does this record identify `(group, test, parameter set)`?
    pub fn is_for(&self, group: &str, test: Option<&str>, parameter_set: Option<usize>) -> bool {
        self.group_name == group
            && self.test_name.as_deref() == test
            && self.parameter_set_index == parameter_set
    }

    /// Qualified label such as `Group/test(1)`
    pub fn label(&self) -> String {
        match (&self.test_name, self.parameter_set_index) {
            (None, _) => self.group_name.clone(),
            (Some(test), None) => format!("{}/{}", self.group_name, test),
            (Some(test), Some(index)) => format!("{}/{}({})", self.group_name, test, index),
        }
    }
}

impl fmt::Display for TestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}ms] - {}", self.label(), self.duration_ms, self.message)
    }
}

/// State of a group's async set-up
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncSetUpState {
    SettingUp,
    Done,
    Failed,
}

impl AsyncSetUpState {
    pub fn symbol(&self) -> &'static str {
        match self {
            AsyncSetUpState::SettingUp => "…",
            AsyncSetUpState::Done => "✓",
            AsyncSetUpState::Failed => "✗",
        }
    }
}

impl fmt::Display for AsyncSetUpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncSetUpState::SettingUp => write!(f, "SETTING_UP"),
            AsyncSetUpState::Done => write!(f, "DONE"),
            AsyncSetUpState::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncSetUpStatus {
    pub state: AsyncSetUpState,
    pub error_message: String,
}

impl AsyncSetUpStatus {
    pub fn setting_up() -> Self {
        Self {
            state: AsyncSetUpState::SettingUp,
            error_message: String::new(),
        }
    }

    pub fn done() -> Self {
        Self {
            state: AsyncSetUpState::Done,
            error_message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: AsyncSetUpState::Failed,
            error_message: message.into(),
        }
    }
}

/// Results of one engine run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    pub passes: Vec<TestRecord>,
    pub errors: Vec<TestRecord>,
    pub async_set_up_by_group: BTreeMap<String, AsyncSetUpStatus>,
}

impl RunResult {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            passes: Vec::new(),
            errors: Vec::new(),
            async_set_up_by_group: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.passes.len() + self.errors.len()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Are any async set-ups still running?
    pub fn is_setting_up(&self) -> bool {
        self.async_set_up_by_group
            .values()
            .any(|s| s.state == AsyncSetUpState::SettingUp)
    }

    pub fn set_up_status(&self, group: &str) -> Option<&AsyncSetUpStatus> {
        self.async_set_up_by_group.get(group)
    }

    pub fn summary(&self) -> RunSummary {
        let count = |state: AsyncSetUpState| {
            self.async_set_up_by_group
                .values()
                .filter(|s| s.state == state)
                .count()
        };

        RunSummary {
            total: self.total(),
            passed: self.passes.len(),
            failed: self.errors.len(),
            set_ups_pending: count(AsyncSetUpState::SettingUp),
            set_ups_done: count(AsyncSetUpState::Done),
            set_ups_failed: count(AsyncSetUpState::Failed),
            total_duration_ms: self
                .passes
                .iter()
                .chain(&self.errors)
                .map(|r| r.duration_ms)
                .sum(),
        }
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        writeln!(
            f,
            "{}",
            if self.is_success() {
                "Test Passed"
            } else {
                "Test Failed"
            }
        )?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for record in &self.errors {
            writeln!(f, "  ✗ {record}")?;
        }
        for record in &self.passes {
            writeln!(f, "  ✓ {record}")?;
        }
        for (group, status) in &self.async_set_up_by_group {
            writeln!(
                f,
                "  {} {group}: {} {}",
                status.state.symbol(),
                status.state,
                status.error_message
            )?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "{summary}")
    }
}

/// Counts derived from a [`RunResult`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub set_ups_pending: usize,
    pub set_ups_done: usize,
    pub set_ups_failed: usize,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Set-up: {} done, {} failed, {} pending | Duration: {}ms",
            self.total,
            self.passed,
            self.failed,
            self.set_ups_done,
            self.set_ups_failed,
            self.set_ups_pending,
            self.total_duration_ms
        )
    }
}
