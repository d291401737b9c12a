//! Default retry configuration
//!
//! [`run`](crate::run) uses a deadline-bounded policy built from
//! [`RetryConfig`]. Values resolve with the following precedence (low to high):
//! 1. Built-in defaults (5s timeout, 10ms poll interval)
//! 2. A YAML file, when the caller loads one
//! 3. Environment variables (`TESTRETRY_*` prefix)

use crate::error::{Error, Result};
use crate::retry::Timer;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;

/// Environment variable overriding [`RetryConfig::timeout_ms`]
pub const ENV_TIMEOUT_MS: &str = "TESTRETRY_TIMEOUT_MS";

/// Environment variable overriding [`RetryConfig::poll_interval_ms`]
pub const ENV_POLL_INTERVAL_MS: &str = "TESTRETRY_POLL_INTERVAL_MS";

/// Configuration of the default deadline-bounded retry policy
///
/// This is an immutable value: every run asks it for a fresh policy through
/// [`RetryConfig::policy`], since policies are stateful and single-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Total time budget across all attempts, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay between attempts, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    5000
}
fn default_poll_interval_ms() -> u64 {
    10
}

fn whole_millis(duration: Duration) -> u64 {
    let partial = duration.subsec_nanos() % 1_000_000 != 0;
    u64::try_from(duration.as_millis() + u128::from(partial)).unwrap_or(u64::MAX)
}

impl RetryConfig {
    /// Create a config from explicit durations
    ///
    /// Durations are stored as whole milliseconds, rounded up so a non-zero
    /// duration never becomes zero. Values beyond `u64::MAX` ms saturate.
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout_ms: whole_millis(timeout),
            poll_interval_ms: whole_millis(poll_interval),
        }
    }

    /// Total time budget
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay between attempts
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Build a fresh deadline-bounded policy for one run
    pub fn policy(&self) -> Timer {
        Timer::new(self.timeout(), self.poll_interval())
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env_overrides()
    }

    /// Parse a config from YAML; missing keys keep their defaults
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(content)?;
        Ok(config)
    }

    /// Load a config from a YAML file
    pub fn load_file(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::config_not_found(path.as_str()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))?;

        tracing::debug!(
            path = %path,
            timeout_ms = config.timeout_ms,
            poll_interval_ms = config.poll_interval_ms,
            "loaded retry config"
        );
        Ok(config)
    }

    /// Apply `TESTRETRY_*` environment variable overrides
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(val) = env::var(ENV_TIMEOUT_MS) {
            self.timeout_ms = val.trim().parse().map_err(|_| {
                Error::invalid_config(format!("{} must be a valid number", ENV_TIMEOUT_MS))
            })?;
        }

        if let Ok(val) = env::var(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = val.trim().parse().map_err(|_| {
                Error::invalid_config(format!("{} must be a valid number", ENV_POLL_INTERVAL_MS))
            })?;
        }

        Ok(self)
    }
}
