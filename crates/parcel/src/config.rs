//! Configuration for the parcel delivery pipeline.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use parcel_core::config::load_yaml_file;
use parcel_core::error::{
    EmptyErrorChannelPathSnafu, EmptySinkPathSnafu, EmptySourcePathSnafu, InvalidValueSnafu,
};
pub use parcel_core::{ConfigError, MetricsConfig};

use crate::retry::{Backoff, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::sink::KeyStrategy;

/// Inbound order queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Queue location (supports S3, GCS, Azure, local).
    pub path: String,
    /// Only objects with this extension are treated as messages.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Maximum messages received per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum messages processed at once.
    #[serde(default = "default_max_concurrent_messages")]
    pub max_concurrent_messages: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Random extra delay (0..N seconds) added to each poll interval.
    #[serde(default)]
    pub poll_jitter_secs: u64,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_extension() -> String {
    "json".to_string()
}

fn default_batch_size() -> usize {
    16
}

fn default_max_concurrent_messages() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    5
}

/// Durable blob sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub path: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Dead-letter queue for messages whose writes were exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorChannelConfig {
    pub path: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Delay between failed attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_ms: default_backoff_max_ms(),
            multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Retry budget and per-attempt limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total write attempts per message, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-attempt timeout; 0 disables it.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_attempt_timeout_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: (self.attempt_timeout_ms > 0)
                .then(|| Duration::from_millis(self.attempt_timeout_ms)),
            backoff: Backoff {
                initial: Duration::from_millis(self.backoff.initial_ms),
                max: Duration::from_millis(self.backoff.max_ms),
                multiplier: self.backoff.multiplier,
                jitter: self.backoff.jitter,
            },
        }
    }
}

/// Deliberate write failures for exercising the retry path. Off unless set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultInjectionConfig {
    /// Probability in `[0.0, 1.0]` that a write fails.
    pub failure_rate: f64,
    /// Seed for a reproducible failure sequence.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub error_channel: ErrorChannelConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fault_injection: Option<FaultInjectionConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_yaml_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = parcel_core::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.path.trim().is_empty(), EmptySourcePathSnafu);
        ensure!(!self.sink.path.trim().is_empty(), EmptySinkPathSnafu);
        ensure!(
            !self.error_channel.path.trim().is_empty(),
            EmptyErrorChannelPathSnafu
        );

        ensure!(
            self.source.batch_size >= 1,
            InvalidValueSnafu {
                field: "source.batch_size",
                message: "must be at least 1",
            }
        );
        ensure!(
            self.source.max_concurrent_messages >= 1,
            InvalidValueSnafu {
                field: "source.max_concurrent_messages",
                message: "must be at least 1",
            }
        );
        ensure!(
            self.retry.max_attempts >= 1,
            InvalidValueSnafu {
                field: "retry.max_attempts",
                message: "must be at least 1",
            }
        );
        ensure!(
            self.retry.backoff.multiplier >= 1.0,
            InvalidValueSnafu {
                field: "retry.backoff.multiplier",
                message: format!("must be >= 1.0, got {}", self.retry.backoff.multiplier),
            }
        );
        ensure!(
            self.retry.backoff.initial_ms <= self.retry.backoff.max_ms,
            InvalidValueSnafu {
                field: "retry.backoff.initial_ms",
                message: "must not exceed retry.backoff.max_ms",
            }
        );
        if let Some(faults) = &self.fault_injection {
            ensure!(
                (0.0..=1.0).contains(&faults.failure_rate),
                InvalidValueSnafu {
                    field: "fault_injection.failure_rate",
                    message: format!("must be within [0.0, 1.0], got {}", faults.failure_rate),
                }
            );
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.source.poll_interval_secs)
    }
}
