//! Queue configuration, loaded from TOML. Every field has a default, so an
//! empty file is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Top-level config ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// `maxRetries` for enqueues that do not give one.
    pub default_max_retries: u32,

    /// Number of dispatch loops.
    pub dispatchers: usize,

    /// Upper bound on concurrently executing tasks, across all dispatchers.
    pub max_in_flight: usize,

    /// How often an idle dispatcher rescans for newly eligible tasks.
    pub poll_interval_ms: u64,

    /// A worker that has not reported after this long is failed.
    pub execution_timeout_ms: u64,

    /// Extra time on top of the execution timeout before the reaper
    /// considers a running task orphaned.
    pub lease_grace_ms: u64,

    pub reaper_interval_ms: u64,
    pub gc_interval_ms: u64,

    /// How long tombstones stay readable before GC removes them.
    pub tombstone_ttl_secs: u64,

    /// Bounded wait for in-flight work on shutdown; the rest is cancelled.
    pub shutdown_grace_ms: u64,

    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            dispatchers: 3,
            max_in_flight: 3,
            poll_interval_ms: 200,
            execution_timeout_ms: 30_000,
            lease_grace_ms: 5_000,
            reaper_interval_ms: 1_000,
            gc_interval_ms: 60_000,
            tombstone_ttl_secs: 3_600,
            shutdown_grace_ms: 5_000,
            retry: RetryConfig::default(),
        }
    }
}

// ── Retry section ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Failed tasks are re-queued at once.
    Immediate,
    /// Failed tasks wait `base * multiplier^(attempts-1)`, capped.
    Backoff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// When false, failed tasks stay failed until retried manually.
    pub automatic: bool,
    pub mode: RetryMode,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Fraction of the delay randomised away, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            automatic: true,
            mode: RetryMode::Backoff,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter: 0.0,
        }
    }
}

// ── Loading ─────────────────────────────────────────────────────────

impl QueueConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("dispatchers", self.dispatchers as u64),
            ("max_in_flight", self.max_in_flight as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("execution_timeout_ms", self.execution_timeout_ms),
            ("reaper_interval_ms", self.reaper_interval_ms),
            ("gc_interval_ms", self.gc_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }

        let retry = &self.retry;
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter must be within [0, 1], got {}",
                retry.jitter
            )));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                retry.max_delay_ms, retry.base_delay_ms
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Lease length granted on claim.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms.saturating_add(self.lease_grace_ms))
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
