//! asyncsuite - async task runner and test orchestration engine
//!
//! Two layers:
//!
//! - [`executor`]: a [`TaskRunner`] drives one asynchronous task with an
//!   optional time limit, guarantees that at most one of its continuations
//!   fires, and can be killed at any point.
//! - [`engine`]: a [`TestEngine`] runs registered test groups, preparing
//!   groups with an async set-up through runners first, and aggregates every
//!   outcome into a [`RunResult`] that observers see after each change.
//!
//! ## Usage
//!
//! ```no_run
//! use asyncsuite::{RunAll, TestEngine, TestGroup, TestTable};
//!
//! struct Strings;
//!
//! impl TestGroup for Strings {
//!     fn tests(&self) -> TestTable<Self> {
//!         TestTable::new().test("upper", |_: &mut Strings| {
//!             anyhow::ensure!("a".to_uppercase() == "A");
//!             Ok(())
//!         })
//!     }
//! }
//!
//! # async fn demo() {
//! let mut engine = TestEngine::new();
//! engine.add_group("Strings", Strings);
//! let result = engine.run(RunAll).finished().await;
//! assert!(result.is_success());
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod utils;

pub use engine::{
    AsyncSetUp, ResultObserver, RunAll, RunHandle, SelectionFilter, Selector, TestEngine,
    TestEntry, TestGroup, TestTable,
};
pub use error::RunnerError;
pub use executor::{OnFailure, OnSuccess, TaskFailure, TaskRunner, TaskState};
pub use models::{AsyncSetUpState, AsyncSetUpStatus, RunResult, TestRecord};
