//! Backoff delay calculation.
//!
//! `attempt` is 1-based and counts retries: attempt 1 is the delay before
//! the first retry, not before the original call.
//!
//! | strategy      | delay before jitter                     |
//! |---------------|-----------------------------------------|
//! | `Exponential` | `base_delay × 2^(attempt-1)`, capped    |
//! | `Linear`      | `base_delay × attempt`, capped          |
//! | `Constant`    | `base_delay`                            |
//!
//! With jitter enabled the capped delay is scaled by a uniform factor in
//! `[0.5, 1.5)`, so a jittered delay never exceeds `max_delay × 1.5`.

use std::time::Duration;

use bulwark_common::error::{ConfigError, ConfigResult};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Lower bound of the jitter factor (inclusive).
pub const JITTER_MIN_FACTOR: f64 = 0.5;
/// Upper bound of the jitter factor (exclusive).
pub const JITTER_MAX_FACTOR: f64 = 1.5;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base_delay × 2^(attempt-1)`
    #[default]
    Exponential,
    /// `base_delay × attempt`
    Linear,
    /// `base_delay` every time
    Constant,
}

/// Validated backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    strategy: BackoffStrategy,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Backoff {
    /// Build a backoff, rejecting `base_delay > max_delay`.
    pub fn new(
        strategy: BackoffStrategy,
        base_delay: Duration,
        max_delay: Duration,
        jitter: bool,
    ) -> ConfigResult<Self> {
        if base_delay > max_delay {
            return Err(ConfigError::invalid(format!(
                "base_delay ({base_delay:?}) must not exceed max_delay ({max_delay:?})"
            )));
        }
        Ok(Self { strategy, base_delay, max_delay, jitter })
    }

    /// Growth strategy.
    pub const fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    /// Delay unit the strategy scales.
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Cap applied before jitter.
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether jitter is applied.
    pub const fn jitter(&self) -> bool {
        self.jitter
    }

    /// Delay for `attempt` before jitter, capped at `max_delay`.
    ///
    /// `attempt = 0` is treated as 1. Arithmetic overflow yields `max_delay`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Exponential => 2u32
                .checked_pow(attempt - 1)
                .and_then(|factor| self.base_delay.checked_mul(factor)),
            BackoffStrategy::Linear => self.base_delay.checked_mul(attempt),
            BackoffStrategy::Constant => Some(self.base_delay),
        };
        raw.map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay for `attempt` using the thread-local RNG for jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Delay for `attempt` drawing jitter from `rng`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped_delay(attempt);
        if self.jitter {
            apply_jitter(capped, rng)
        } else {
            capped
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Scale `delay` by a uniform factor in `[0.5, 1.5)`.
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let factor = rng.gen_range(JITTER_MIN_FACTOR..JITTER_MAX_FACTOR);
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Delay before retry number `attempt` under `policy`.
pub fn delay<E>(attempt: u32, policy: &RetryPolicy<E>) -> Duration {
    policy.backoff().delay(attempt)
}
