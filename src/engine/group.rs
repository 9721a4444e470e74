//! Test group registration surface
//!
//! A group declares its tests in a [`TestTable`], in the order they should
//! run. Groups that need asynchronous preparation also implement
//! [`AsyncSetUp`] and are registered with
//! [`TestEngine::add_async_group`](super::TestEngine::add_async_group).

use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::executor::{OnFailure, OnSuccess};

/// One argument tuple for a parameterized test
pub type ParameterSet = Vec<Value>;

/// Lifecycle names that never count as tests
pub const RESERVED_MEMBER_NAMES: &[&str] = &[
    "setUp",
    "tearDown",
    "asyncSetUp",
    "setUpTimeLimit",
    "set_up",
    "tear_down",
    "async_set_up",
    "set_up_time_limit",
];

/// Default prefix marking a member as private
pub const DEFAULT_PRIVATE_MEMBER_PREFIX: &str = "_";

pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_MEMBER_NAMES.contains(&name)
}

type TestFn<G> = Box<dyn Fn(&mut G) -> anyhow::Result<()> + Send + Sync>;
type ParameterizedFn<G> = Box<dyn Fn(&mut G, &[Value]) -> anyhow::Result<()> + Send + Sync>;

pub(crate) enum TestBody<G> {
    Plain(TestFn<G>),
    Parameterized {
        body: ParameterizedFn<G>,
        parameter_sets: Vec<ParameterSet>,
    },
}

/// A named test procedure of group `G`
pub struct TestMember<G> {
    name: String,
    pub(crate) body: TestBody<G>,
}

impl<G> TestMember<G> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attached parameter sets, if the test is parameterized
    pub fn parameter_sets(&self) -> Option<&[ParameterSet]> {
        match &self.body {
            TestBody::Plain(_) => None,
            TestBody::Parameterized { parameter_sets, .. } => Some(parameter_sets),
        }
    }
}

impl<G> fmt::Debug for TestMember<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestMember")
            .field("name", &self.name)
            .field("parameter_sets", &self.parameter_sets().map(|p| p.len()))
            .finish()
    }
}

/// Declaration-ordered table of a group's tests
pub struct TestTable<G> {
    members: Vec<TestMember<G>>,
}

impl<G> TestTable<G> {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    /// Add a test run once with no arguments
    pub fn test<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut G) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.members.push(TestMember {
            name: name.into(),
            body: TestBody::Plain(Box::new(body)),
        });
        self
    }

    /// Add a test run once per parameter set
    pub fn parameterized<F>(
        mut self,
        name: impl Into<String>,
        parameter_sets: Vec<ParameterSet>,
        body: F,
    ) -> Self
    where
        F: Fn(&mut G, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.members.push(TestMember {
            name: name.into(),
            body: TestBody::Parameterized {
                body: Box::new(body),
                parameter_sets,
            },
        });
        self
    }

    pub fn members(&self) -> &[TestMember<G>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<G> Default for TestTable<G> {
    fn default() -> Self {
        Self::new()
    }
}

/// A named collection of tests sharing `set_up`/`tear_down`
pub trait TestGroup: Sized + Send + 'static {
    /// The group's tests, in declared order
    fn tests(&self) -> TestTable<Self>;

    /// Runs before every test
    fn set_up(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after every test, even a failing one
    fn tear_down(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Capability of groups that prepare asynchronously before their tests run
pub trait AsyncSetUp: TestGroup {
    /// Zero means no limit
    fn set_up_time_limit(&self) -> Duration {
        Duration::ZERO
    }

    /// Start the set-up; signal completion through one of the continuations
    fn async_set_up(&mut self, on_success: OnSuccess, on_failure: OnFailure) -> anyhow::Result<()>;
}
