//! File-based resilience settings.
//!
//! Settings are plain serde structs; every field has a default so a file
//! only needs to name what it overrides. Converting to policies validates
//! them.
//!
//! ```toml
//! timeout_ms = 5000
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 200
//! non_retryable_kinds = ["not_found"]
//!
//! [circuit_breakers.payments]
//! failure_threshold = 3
//! ignored_kinds = ["validation"]
//! ```
//!
//! The format is picked from the file extension: `.toml` or `.json`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bulwark_common::error::{ConfigError, ConfigResult, ErrorClassification};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffStrategy;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File that failed to load
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The content is not valid for its format.
    #[error("Invalid {format} format: {message}")]
    Parse {
        /// Format the content was parsed as
        format: SettingsFormat,
        /// Parser diagnostic
        message: String,
    },

    /// The file extension names no supported format.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// The settings parsed but describe an invalid policy.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl ErrorClassification for SettingsError {
    fn error_kind(&self) -> &'static str {
        match self {
            Self::Io { source, .. } => source.error_kind(),
            Self::Parse { .. } => "parse_error",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Invalid(inner) => inner.error_kind(),
        }
    }
}

/// Result alias for settings loading.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Serialization format of a settings document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    /// TOML via `toml`
    Toml,
    /// JSON via `serde_json`
    Json,
}

impl SettingsFormat {
    /// Detect the format from a path's extension.
    pub fn from_path(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            Some(other) => Err(SettingsError::UnsupportedFormat(other.to_owned())),
            None => Err(SettingsError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl fmt::Display for SettingsFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        })
    }
}

/// Retry settings, see [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff growth strategy.
    pub strategy: BackoffStrategy,
    /// Whether delays are randomized.
    pub jitter: bool,
    /// Error kinds that are never retried.
    pub non_retryable_kinds: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            non_retryable_kinds: Vec::new(),
        }
    }
}

impl RetrySettings {
    /// Validate into a policy.
    pub fn to_policy<E>(&self) -> ConfigResult<RetryPolicy<E>> {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .strategy(self.strategy)
            .jitter(self.jitter)
            .non_retryable_kinds(self.non_retryable_kinds.iter().cloned())
            .build()
    }
}

/// Settings for one named breaker, see [`CircuitBreakerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failures inside the window that open the circuit.
    pub failure_threshold: u32,
    /// Sliding window in milliseconds.
    pub failure_window_ms: u64,
    /// Cooldown before a half-open trial, in milliseconds.
    pub recovery_timeout_ms: u64,
    /// Half-open successes needed to close.
    pub success_threshold: u32,
    /// Kinds that count as failures; absent means all kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kinds: Option<Vec<String>>,
    /// Kinds that are never counted.
    pub ignored_kinds: Vec<String>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: CircuitBreakerConfig::DEFAULT_FAILURE_THRESHOLD,
            failure_window_ms: duration_millis(CircuitBreakerConfig::DEFAULT_FAILURE_WINDOW),
            recovery_timeout_ms: duration_millis(CircuitBreakerConfig::DEFAULT_RECOVERY_TIMEOUT),
            success_threshold: CircuitBreakerConfig::DEFAULT_SUCCESS_THRESHOLD,
            failure_kinds: None,
            ignored_kinds: Vec::new(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Validate into the configuration for the breaker called `name`.
    pub fn to_config(&self, name: &str) -> ConfigResult<CircuitBreakerConfig> {
        let mut builder = CircuitBreakerConfig::builder(name)
            .failure_threshold(self.failure_threshold)
            .failure_window(Duration::from_millis(self.failure_window_ms))
            .recovery_timeout(Duration::from_millis(self.recovery_timeout_ms))
            .success_threshold(self.success_threshold)
            .ignored_kinds(self.ignored_kinds.iter().cloned());
        if let Some(kinds) = &self.failure_kinds {
            builder = builder.failure_kinds(kinds.iter().cloned());
        }
        builder.build()
    }
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Per-attempt deadline in milliseconds; absent disables the timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Retry settings shared by pipelines built from this document.
    pub retry: RetrySettings,
    /// Breakers keyed by name.
    pub circuit_breakers: BTreeMap<String, CircuitBreakerSettings>,
}

impl ResilienceSettings {
    /// Per-attempt deadline, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Validated retry policy.
    pub fn retry_policy<E>(&self) -> ConfigResult<RetryPolicy<E>> {
        self.retry.to_policy()
    }

    /// Validated configuration for the breaker called `name`, if declared.
    pub fn circuit_breaker(&self, name: &str) -> Option<ConfigResult<CircuitBreakerConfig>> {
        self.circuit_breakers.get(name).map(|settings| settings.to_config(name))
    }

    /// Validated configurations for every declared breaker, ordered by name.
    pub fn circuit_breaker_configs(&self) -> ConfigResult<Vec<CircuitBreakerConfig>> {
        self.circuit_breakers.iter().map(|(name, settings)| settings.to_config(name)).collect()
    }

    /// Check every section converts cleanly.
    pub fn validate(&self) -> ConfigResult<()> {
        self.retry.to_policy::<()>()?;
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::invalid("timeout_ms must be greater than zero"));
        }
        self.circuit_breaker_configs()?;
        Ok(())
    }
}

/// Parse and validate settings from `content`.
pub fn parse_settings(content: &str, format: SettingsFormat) -> SettingsResult<ResilienceSettings> {
    let settings: ResilienceSettings = match format {
        SettingsFormat::Toml => toml::from_str(content)
            .map_err(|e| SettingsError::Parse { format, message: e.to_string() })?,
        SettingsFormat::Json => serde_json::from_str(content)
            .map_err(|e| SettingsError::Parse { format, message: e.to_string() })?,
    };
    settings.validate()?;
    Ok(settings)
}

/// Load and validate settings from a `.toml` or `.json` file.
pub fn load_from_file(path: impl AsRef<Path>) -> SettingsResult<ResilienceSettings> {
    let path = path.as_ref();
    let format = SettingsFormat::from_path(path)?;

    tracing::info!(path = %path.display(), %format, "loading resilience settings");

    let content = std::fs::read_to_string(path)
        .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;

    parse_settings(&content, format)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
