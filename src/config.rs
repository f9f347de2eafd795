//! Configuration management for sevdesk-pacer.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PacerError, Result};

/// Environment variable prefix for configuration overrides.
///
/// Nested keys are separated by `__`, e.g. `SEVDESK_PACER__LIMITER__MAX_REQUESTS`.
pub const ENV_PREFIX: &str = "SEVDESK_PACER";

/// Main configuration for the pacer binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: RateLimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for a single [`RateLimiter`](crate::ratelimit::RateLimiter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum requests admitted per sliding window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Sliding window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Minimum spacing between two consecutive requests in milliseconds
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum retry attempts per logical operation
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
        }
    }
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_min_delay_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1_000
}

impl RateLimiterConfig {
    /// Sliding window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Minimum spacing between consecutive requests.
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Base delay for exponential backoff.
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    /// Return a copy with every field set in `update` overridden.
    pub fn merge(mut self, update: RateLimiterConfigUpdate) -> Self {
        if let Some(max_requests) = update.max_requests {
            self.max_requests = max_requests;
        }
        if let Some(window_ms) = update.window_ms {
            self.window_ms = window_ms;
        }
        if let Some(min_delay_ms) = update.min_delay_ms {
            self.min_delay_ms = min_delay_ms;
        }
        if let Some(max_retries) = update.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(base_retry_delay_ms) = update.base_retry_delay_ms {
            self.base_retry_delay_ms = base_retry_delay_ms;
        }
        self
    }

    /// Check that the quota settings describe a usable window.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(PacerError::Config(
                "max_requests must be greater than 0".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(PacerError::Config(
                "window_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A partial [`RateLimiterConfig`]; unset fields leave the current value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfigUpdate {
    /// New quota per window
    #[serde(default)]
    pub max_requests: Option<u32>,
    /// New window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// New minimum spacing in milliseconds
    #[serde(default)]
    pub min_delay_ms: Option<u64>,
    /// New retry ceiling
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// New backoff base in milliseconds
    #[serde(default)]
    pub base_retry_delay_ms: Option<u64>,
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log line format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PacerConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PacerConfig = serde_yaml::from_str(yaml)
            .map_err(|e| PacerError::Config(format!("Failed to parse pacer config: {}", e)))?;
        config.limiter.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading pacer configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional YAML file layered under
    /// `SEVDESK_PACER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading pacer configuration");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PacerConfig = settings.try_deserialize()?;
        config.limiter.validate()?;
        Ok(config)
    }
}
