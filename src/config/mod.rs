//! Configuration module
//!
//! Engine settings parsed from YAML or JSON and overridable from the
//! environment.

pub mod env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::Level;

use crate::engine::{Selector, DEFAULT_PRIVATE_MEMBER_PREFIX};
use crate::output::OutputFormat;
use env::EnvConfig;

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Members starting with this prefix are never run; empty disables
    pub private_member_prefix: String,

    /// Limit for async set-ups that declare none, in milliseconds (0 = none)
    pub default_set_up_time_limit_ms: u64,

    /// Selection fragment such as `#Group/test(1)`
    pub selection: Option<String>,

    pub log_level: String,

    pub output_format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            private_member_prefix: DEFAULT_PRIVATE_MEMBER_PREFIX.to_string(),
            default_set_up_time_limit_ms: 0,
            selection: None,
            log_level: "info".to_string(),
            output_format: "table".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content).context("Failed to parse JSON config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }

    /// Tracing level named by `log_level`, case-insensitive
    pub fn level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown log level: {}", self.log_level))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.level()?;

        if OutputFormat::from_str(&self.output_format).is_none() {
            anyhow::bail!("Unknown output format: {}", self.output_format);
        }

        if let Some(selection) = &self.selection {
            if Selector::parse_fragment(selection).is_none() {
                anyhow::bail!(
                    "Invalid selection '{}'. Expected #group, #group/test or #group/test(N)",
                    selection
                );
            }
        }

        Ok(())
    }

    /// Apply `ASYNCSUITE_*` overrides, then re-validate
    pub fn with_env(mut self, env: &EnvConfig) -> Result<Self> {
        if let Some(prefix) = &env.private_member_prefix {
            self.private_member_prefix = prefix.clone();
        }
        if let Some(limit) = env.set_up_time_limit_ms {
            self.default_set_up_time_limit_ms = limit;
        }
        if let Some(selection) = &env.selection {
            self.selection = Some(selection.clone());
        }
        if let Some(level) = &env.log_level {
            self.log_level = level.clone();
        }
        if let Some(format) = &env.format {
            self.output_format = format.clone();
        }

        self.validate().context("Invalid environment override")?;
        Ok(self)
    }

    pub fn default_set_up_time_limit(&self) -> Duration {
        Duration::from_millis(self.default_set_up_time_limit_ms)
    }

    /// Configured selection; unset or unparsable runs everything
    pub fn selector(&self) -> Selector {
        self.selection
            .as_deref()
            .map(Selector::from_fragment)
            .unwrap_or_default()
    }
}
