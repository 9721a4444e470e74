//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ASYNCSUITE";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Private member prefix from ASYNCSUITE_PRIVATE_PREFIX
    pub private_member_prefix: Option<String>,
    /// Default set-up limit from ASYNCSUITE_SET_UP_TIME_LIMIT_MS
    pub set_up_time_limit_ms: Option<u64>,
    /// Selection fragment from ASYNCSUITE_SELECT
    pub selection: Option<String>,
    /// Log level from ASYNCSUITE_LOG_LEVEL
    pub log_level: Option<String>,
    /// Output format from ASYNCSUITE_FORMAT
    pub format: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            private_member_prefix: get_env("PRIVATE_PREFIX"),
            set_up_time_limit_ms: get_env_parse("SET_UP_TIME_LIMIT_MS"),
            selection: get_env("SELECT"),
            log_level: get_env("LOG_LEVEL"),
            format: get_env("FORMAT"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.private_member_prefix.is_some()
            || self.set_up_time_limit_ms.is_some()
            || self.selection.is_some()
            || self.log_level.is_some()
            || self.format.is_some()
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn private_member_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_PRIVATE_PREFIX"), prefix.into()));
        self
    }

    pub fn set_up_time_limit_ms(mut self, limit: u64) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_SET_UP_TIME_LIMIT_MS"), limit.to_string()));
        self
    }

    pub fn selection(mut self, fragment: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_SELECT"), fragment.into()));
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_FORMAT"), format.into()));
        self
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Help text listing the recognised variables
pub fn env_help() -> String {
    [
        format!("  {ENV_PREFIX}_PRIVATE_PREFIX         Prefix marking members as private"),
        format!("  {ENV_PREFIX}_SET_UP_TIME_LIMIT_MS   Default async set-up limit (0 = none)"),
        format!("  {ENV_PREFIX}_SELECT                 Selection fragment, e.g. #Group/test(1)"),
        format!("  {ENV_PREFIX}_LOG_LEVEL              trace, debug, info, warn or error"),
        format!("  {ENV_PREFIX}_FORMAT                 table, json, json-pretty, csv or summary"),
    ]
    .join("\n")
}
