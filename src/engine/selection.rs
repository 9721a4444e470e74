//! Test selection
//!
//! Filters consulted by the engine before running each group, each test and
//! each parameter set. The three predicates are independent; the engine
//! applies them at the matching level.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

static FRAGMENT_REGEX: OnceLock<Regex> = OnceLock::new();

/// Decides which groups, tests and parameter sets run
pub trait SelectionFilter: Send + Sync {
    fn is_group_active(&self, group_name: &str) -> bool;
    fn is_test_active(&self, test_name: &str) -> bool;
    fn is_parameter_set_active(&self, index: usize) -> bool;
}

impl<T: SelectionFilter + ?Sized> SelectionFilter for Arc<T> {
    fn is_group_active(&self, group_name: &str) -> bool {
        (**self).is_group_active(group_name)
    }

    fn is_test_active(&self, test_name: &str) -> bool {
        (**self).is_test_active(test_name)
    }

    fn is_parameter_set_active(&self, index: usize) -> bool {
        (**self).is_parameter_set_active(index)
    }
}

/// Filter that runs everything
#[derive(Clone, Copy, Debug, Default)]
pub struct RunAll;

impl SelectionFilter for RunAll {
    fn is_group_active(&self, _group_name: &str) -> bool {
        true
    }

    fn is_test_active(&self, _test_name: &str) -> bool {
        true
    }

    fn is_parameter_set_active(&self, _index: usize) -> bool {
        true
    }
}

/// Exact-match selector; an unset level matches everything
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub group: Option<String>,
    pub test: Option<String>,
    pub parameter_set: Option<usize>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn test(mut self, test: impl Into<String>) -> Self {
        self.test = Some(test.into());
        self
    }

    pub fn parameter_set(mut self, index: usize) -> Self {
        self.parameter_set = Some(index);
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.group.is_none() && self.test.is_none() && self.parameter_set.is_none()
    }

    /// Parse the link-fragment form: `#group`, `#group/test` or `#group/test(N)`
    ///
    /// Names are `[_a-zA-Z0-9]+`. Returns `None` when the string does not
    /// match or the index does not fit a `usize`; callers usually fall back
    /// to an unrestricted selector.
    pub fn parse_fragment(value: &str) -> Option<Self> {
        let re = FRAGMENT_REGEX.get_or_init(|| {
            Regex::new(r"^#([_a-zA-Z0-9]+)((/([_a-zA-Z0-9]+))(\(([0-9]+)\))?)?$")
                .expect("fragment pattern is valid")
        });
        let caps = re.captures(value)?;
        let parameter_set = match caps.get(6) {
            Some(m) => Some(m.as_str().parse().ok()?),
            None => None,
        };

        Some(Self {
            group: caps.get(1).map(|m| m.as_str().to_string()),
            test: caps.get(4).map(|m| m.as_str().to_string()),
            parameter_set,
        })
    }

    /// Like [`Selector::parse_fragment`], falling back to run everything
    pub fn from_fragment(value: &str) -> Self {
        Self::parse_fragment(value).unwrap_or_default()
    }

    /// Render back to the link-fragment form
    pub fn to_fragment(&self) -> Option<String> {
        let group = self.group.as_ref()?;
        let mut fragment = format!("#{group}");
        if let Some(test) = &self.test {
            fragment.push('/');
            fragment.push_str(test);
            if let Some(index) = self.parameter_set {
                fragment.push_str(&format!("({index})"));
            }
        }
        Some(fragment)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_fragment() {
            Some(fragment) => write!(f, "{fragment}"),
            None if self.is_unrestricted() => write!(f, "<all>"),
            None => write!(
                f,
                "<any group>/{}({:?})",
                self.test.as_deref().unwrap_or("*"),
                self.parameter_set
            ),
        }
    }
}

impl SelectionFilter for Selector {
    fn is_group_active(&self, group_name: &str) -> bool {
        self.group.as_deref().map_or(true, |g| g == group_name)
    }

    fn is_test_active(&self, test_name: &str) -> bool {
        self.test.as_deref().map_or(true, |t| t == test_name)
    }

    fn is_parameter_set_active(&self, index: usize) -> bool {
        self.parameter_set.map_or(true, |p| p == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_all() {
        assert!(RunAll.is_group_active("anything"));
        assert!(RunAll.is_test_active("anything"));
        assert!(RunAll.is_parameter_set_active(42));
    }

    #[test]
    fn test_unset_levels_match_everything() {
        let selector = Selector::new();
        assert!(selector.is_unrestricted());
        assert!(selector.is_group_active("Suite1"));
        assert!(selector.is_test_active("t1"));
        assert!(selector.is_parameter_set_active(3));
    }

    #[test]
    fn test_levels_are_independent() {
        let selector = Selector::new().test("t1");
        assert!(selector.is_group_active("Suite1"));
        assert!(selector.is_group_active("Suite2"));
        assert!(selector.is_test_active("t1"));
        assert!(!selector.is_test_active("t2"));
        assert!(selector.is_parameter_set_active(0));
    }

    #[test]
    fn test_parse_group_only() {
        let selector = Selector::parse_fragment("#Suite2").unwrap();
        assert_eq!(selector, Selector::new().group("Suite2"));
    }

    #[test]
    fn test_parse_group_and_test() {
        let selector = Selector::parse_fragment("#Suite2/adds_numbers").unwrap();
        assert_eq!(selector, Selector::new().group("Suite2").test("adds_numbers"));
    }

    #[test]
    fn test_parse_parameter_set() {
        let selector = Selector::parse_fragment("#Math/sum(1)").unwrap();
        assert_eq!(selector.group.as_deref(), Some("Math"));
        assert_eq!(selector.test.as_deref(), Some("sum"));
        assert_eq!(selector.parameter_set, Some(1));
        assert!(!selector.is_parameter_set_active(0));
        assert!(selector.is_parameter_set_active(1));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Selector::parse_fragment(""), None);
        assert_eq!(Selector::parse_fragment("#"), None);
        assert_eq!(Selector::parse_fragment("Suite"), None);
        assert_eq!(Selector::parse_fragment("#Suite/"), None);
        assert_eq!(Selector::parse_fragment("#Suite/t(x)"), None);
        assert_eq!(Selector::parse_fragment("#my-suite"), None);
        assert_eq!(Selector::parse_fragment("#Math/sum(99999999999999999999999)"), None);
        assert!(Selector::from_fragment("#my-suite").is_unrestricted());
    }

    #[test]
    fn test_fragment_round_trip() {
        for fragment in ["#G", "#G/t", "#G/t(2)"] {
            let selector = Selector::parse_fragment(fragment).unwrap();
            assert_eq!(selector.to_fragment().as_deref(), Some(fragment));
        }
        assert_eq!(Selector::new().to_string(), "<all>");
    }
}
