//! Data models for test runs
//!
//! Result records and per-run state shared by the engine and its observers.

mod test_result;

pub use test_result::{
    AsyncSetUpState, AsyncSetUpStatus, RunResult, RunSummary, TestRecord, PASS_MESSAGE,
};
