//! Circuit breaker configuration.

use std::collections::HashSet;
use std::time::Duration;

use bulwark_common::error::{ConfigError, ConfigResult};

/// How a breaker treats an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Counts toward the failure threshold and may trigger the fallback.
    Counted,
    /// Neither counted nor ignored: propagated unchanged, state untouched.
    NotCounted,
    /// Always re-raised unmodified; never counted, retried or replaced.
    Ignored,
}

/// Immutable configuration for one named breaker.
///
/// Built through [`CircuitBreakerConfig::builder`]; validation happens in
/// [`CircuitBreakerConfigBuilder::build`] so a breaker never sees an invalid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    name: String,
    failure_threshold: u32,
    failure_window: Duration,
    recovery_timeout: Duration,
    success_threshold: u32,
    failure_kinds: Option<HashSet<String>>,
    ignored_kinds: HashSet<String>,
}

impl CircuitBreakerConfig {
    /// Default number of failures inside the window that opens the circuit.
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
    /// Default sliding window for counting failures.
    pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);
    /// Default cooldown before a half-open trial is admitted.
    pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default number of half-open successes needed to close.
    pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

    /// Start building a configuration for the breaker called `name`.
    pub fn builder(name: impl Into<String>) -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new(name)
    }

    /// Unique key in the registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Failures within the window that open the circuit.
    pub const fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Sliding window over which failures are counted.
    pub const fn failure_window(&self) -> Duration {
        self.failure_window
    }

    /// How long the circuit stays open before admitting a trial.
    pub const fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Consecutive half-open successes needed to close.
    pub const fn success_threshold(&self) -> u32 {
        self.success_threshold
    }

    /// Kinds that count as failures; `None` means every kind counts.
    pub const fn failure_kinds(&self) -> Option<&HashSet<String>> {
        self.failure_kinds.as_ref()
    }

    /// Kinds that never affect the breaker.
    pub const fn ignored_kinds(&self) -> &HashSet<String> {
        &self.ignored_kinds
    }

    /// Decide how an error of `kind` is treated. Ignored wins over counted.
    pub fn classify(&self, kind: &str) -> ErrorDisposition {
        if self.ignored_kinds.contains(kind) {
            return ErrorDisposition::Ignored;
        }
        match &self.failure_kinds {
            Some(kinds) if !kinds.contains(kind) => ErrorDisposition::NotCounted,
            _ => ErrorDisposition::Counted,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Builder with defaults for breaker `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: CircuitBreakerConfig {
                name: name.into(),
                failure_threshold: CircuitBreakerConfig::DEFAULT_FAILURE_THRESHOLD,
                failure_window: CircuitBreakerConfig::DEFAULT_FAILURE_WINDOW,
                recovery_timeout: CircuitBreakerConfig::DEFAULT_RECOVERY_TIMEOUT,
                success_threshold: CircuitBreakerConfig::DEFAULT_SUCCESS_THRESHOLD,
                failure_kinds: None,
                ignored_kinds: HashSet::new(),
            },
        }
    }

    /// Failures within the window that open the circuit (≥ 1).
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Sliding window for failure counting (> 0).
    #[must_use]
    pub const fn failure_window(mut self, window: Duration) -> Self {
        self.config.failure_window = window;
        self
    }

    /// Cooldown before a half-open trial.
    #[must_use]
    pub const fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Half-open successes needed to close (≥ 1).
    #[must_use]
    pub const fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Restrict counted failures to these kinds. Repeated calls accumulate.
    #[must_use]
    pub fn failure_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.failure_kinds.get_or_insert_with(HashSet::new).extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Kinds that pass through untouched. Repeated calls accumulate.
    #[must_use]
    pub fn ignored_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.ignored_kinds.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        let config = self.config;
        if config.name.trim().is_empty() {
            return Err(ConfigError::invalid("circuit breaker name must not be empty"));
        }
        if config.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be at least 1"));
        }
        if config.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be at least 1"));
        }
        if config.failure_window.is_zero() {
            return Err(ConfigError::invalid("failure_window must be greater than zero"));
        }
        if config.failure_kinds.as_ref().is_some_and(HashSet::is_empty) {
            return Err(ConfigError::invalid("failure_kinds must not be empty when restricted"));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates default values.
    #[test]
    fn test_config_defaults() {
        let config = CircuitBreakerConfig::builder("db").build().unwrap();

        assert_eq!(config.name(), "db");
        assert_eq!(config.failure_threshold(), 5);
        assert_eq!(config.failure_window(), Duration::from_secs(60));
        assert_eq!(config.recovery_timeout(), Duration::from_secs(30));
        assert_eq!(config.success_threshold(), 2);
        assert!(config.failure_kinds().is_none());
        assert!(config.ignored_kinds().is_empty());
    }

    /// Validates rejection of each invalid field.
    ///
    /// Assertions:
    /// - Confirms empty names, zero thresholds, a zero window and an empty
    ///   restricted kind set are all rejected.
    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::builder("  ").build().is_err());
        assert!(CircuitBreakerConfig::builder("a").failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder("a").success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder("a").failure_window(Duration::ZERO).build().is_err());
        assert!(CircuitBreakerConfig::builder("a")
            .failure_kinds(Vec::<String>::new())
            .build()
            .is_err());
    }

    /// Validates error classification against configured kind sets.
    ///
    /// Assertions:
    /// - Confirms every kind counts when unrestricted.
    /// - Confirms restricted sets leave other kinds uncounted.
    /// - Confirms ignored kinds win over counted kinds.
    #[test]
    fn test_classify() {
        let open = CircuitBreakerConfig::builder("a").ignored_kinds(["not_found"]).build().unwrap();
        assert_eq!(open.classify("timed_out"), ErrorDisposition::Counted);
        assert_eq!(open.classify("not_found"), ErrorDisposition::Ignored);

        let restricted = CircuitBreakerConfig::builder("b")
            .failure_kinds(["timed_out", "connection_reset"])
            .ignored_kinds(["timed_out"])
            .build()
            .unwrap();
        assert_eq!(restricted.classify("connection_reset"), ErrorDisposition::Counted);
        assert_eq!(restricted.classify("invalid_input"), ErrorDisposition::NotCounted);
        assert_eq!(restricted.classify("timed_out"), ErrorDisposition::Ignored);
    }
}
