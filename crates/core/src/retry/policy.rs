//! Retry policy: how many attempts, how long to wait, what to retry.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::error::{ConfigError, ConfigResult, ErrorClassification};

use crate::backoff::{Backoff, BackoffStrategy};

/// Custom retryability check, consulted after the kind exclusions.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retryable under the policy
    Transient,
    /// Excluded by kind or rejected by the predicate
    Permanent,
}

/// Immutable retry policy.
///
/// # Attempt counting
///
/// `max_attempts` is the **total** number of attempts, including the
/// original call. `max_attempts = 1` disables retrying; `max_attempts = 3`
/// means one call plus at most two retries.
///
/// # Classification
///
/// An error is retried when its kind is not listed in
/// `non_retryable_kinds` **and** the optional predicate (if set) returns
/// `true`. Without a predicate every other error is retried.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    backoff: Backoff,
    non_retryable_kinds: HashSet<String>,
    predicate: Option<RetryPredicate<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            non_retryable_kinds: self.non_retryable_kinds.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("non_retryable_kinds", &self.non_retryable_kinds)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            max_attempts: RetryPolicyBuilder::<E>::DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            non_retryable_kinds: HashSet::new(),
            predicate: None,
        }
    }
}

impl<E> RetryPolicy<E> {
    /// Start building a policy from the defaults (3 attempts, exponential
    /// 1 s → 30 s, jitter on).
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Total attempts including the first call.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay calculation parameters.
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Kinds that are never retried.
    pub const fn non_retryable_kinds(&self) -> &HashSet<String> {
        &self.non_retryable_kinds
    }

    /// Delay before retry number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub(crate) fn extend_non_retryable<I>(&mut self, kinds: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.non_retryable_kinds.extend(kinds);
    }
}

impl<E: ErrorClassification> RetryPolicy<E> {
    /// Classify `error` under this policy.
    pub fn classify(&self, error: &E) -> FailureClass {
        if self.non_retryable_kinds.contains(error.error_kind()) {
            return FailureClass::Permanent;
        }
        match &self.predicate {
            Some(predicate) if !predicate(error) => FailureClass::Permanent,
            _ => FailureClass::Transient,
        }
    }

    /// Whether `error` may be retried.
    pub fn is_retryable(&self, error: &E) -> bool {
        self.classify(error) == FailureClass::Transient
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
    jitter: bool,
    non_retryable_kinds: HashSet<String>,
    predicate: Option<RetryPredicate<E>>,
}

impl<E> fmt::Debug for RetryPolicyBuilder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicyBuilder")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("strategy", &self.strategy)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryPolicyBuilder<E> {
    const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Builder seeded with the defaults.
    pub fn new() -> Self {
        let backoff = Backoff::default();
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: backoff.base_delay(),
            max_delay: backoff.max_delay(),
            strategy: backoff.strategy(),
            jitter: backoff.jitter(),
            non_retryable_kinds: HashSet::new(),
            predicate: None,
        }
    }

    /// Total attempts including the first call (≥ 1).
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay unit for the backoff strategy.
    #[must_use]
    pub const fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap applied before jitter (≥ base delay).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Backoff growth strategy.
    #[must_use]
    pub const fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Never retry errors of `kind`.
    #[must_use]
    pub fn non_retryable_kind(mut self, kind: impl Into<String>) -> Self {
        self.non_retryable_kinds.insert(kind.into());
        self
    }

    /// Never retry errors of any of `kinds`.
    #[must_use]
    pub fn non_retryable_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_retryable_kinds.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Only retry errors for which `predicate` returns `true`.
    #[must_use]
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Validate and produce the policy.
    pub fn build(self) -> ConfigResult<RetryPolicy<E>> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        let backoff = Backoff::new(self.strategy, self.base_delay, self.max_delay, self.jitter)?;
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
            non_retryable_kinds: self.non_retryable_kinds,
            predicate: self.predicate,
        })
    }
}
