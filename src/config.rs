// Copyright (c) 2025 - Cowboy AI, Inc.
//! Engine and telemetry configuration
//!
//! Every setting has a default and can be overridden from the environment:
//!
//! | variable                              | default |
//! |---------------------------------------|---------|
//! | `CIM_ENGINE_MAX_CONFLICT_RETRIES`     | 3       |
//! | `CIM_ENGINE_CONFLICT_BACKOFF_MS`      | 10      |
//! | `CIM_ENGINE_OUTBOX_BATCH_SIZE`        | 100     |
//! | `CIM_ENGINE_OUTBOX_SWEEP_INTERVAL_MS` | 1000    |
//! | `CIM_ENGINE_QUEUE_CAPACITY`           | 1024    |
//! | `CIM_LOG`                             | info    |
//! | `CIM_LOG_JSON`                        | false   |

use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigurationError;

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Automatic re-runs after a save-time version conflict
    pub max_conflict_retries: u32,

    /// Base delay before a retry; attempt `n` waits `n * conflict_backoff`
    pub conflict_backoff: Duration,

    /// Outbox entries republished per sweep
    pub outbox_batch_size: usize,

    /// Pause between outbox sweeps
    pub outbox_sweep_interval: Duration,

    /// Capacity of the in-memory command queue
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            conflict_backoff: Duration::from_millis(10),
            outbox_batch_size: 100,
            outbox_sweep_interval: Duration::from_secs(1),
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load from `CIM_ENGINE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            max_conflict_retries: parse(&lookup, "CIM_ENGINE_MAX_CONFLICT_RETRIES")?
                .unwrap_or(defaults.max_conflict_retries),
            conflict_backoff: parse(&lookup, "CIM_ENGINE_CONFLICT_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.conflict_backoff),
            outbox_batch_size: parse(&lookup, "CIM_ENGINE_OUTBOX_BATCH_SIZE")?
                .unwrap_or(defaults.outbox_batch_size),
            outbox_sweep_interval: parse(&lookup, "CIM_ENGINE_OUTBOX_SWEEP_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_sweep_interval),
            queue_capacity: parse(&lookup, "CIM_ENGINE_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.outbox_batch_size == 0 {
            return Err(invalid("outbox_batch_size", "0", "must be at least 1"));
        }
        if self.outbox_sweep_interval.is_zero() {
            return Err(invalid("outbox_sweep_interval", "0", "must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "0", "must be at least 1"));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.conflict_backoff.saturating_mul(attempt)
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Fallback filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Load from `CIM_LOG` and `CIM_LOG_JSON`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            level: lookup("CIM_LOG").unwrap_or(defaults.level),
            json: lookup("CIM_LOG_JSON")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.json),
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err: T::Err| invalid(key, &raw, &err.to_string())),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
