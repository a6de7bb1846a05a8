//! Circuit breaker state machine.
//!
//! ```text
//!            failures in window ≥ threshold
//!   CLOSED ─────────────────────────────────▶ OPEN
//!     ▲                                       │  ▲
//!     │ successes ≥ success_threshold         │  │ trial fails
//!     │                 recovery timeout      ▼  │
//!     └──────────────────────────────────── HALF_OPEN
//! ```
//!
//! All state lives behind one `parking_lot::Mutex` per breaker, so unrelated
//! breakers never contend. Admission and outcome recording are two separate
//! critical sections; the work itself runs outside the lock. HALF_OPEN admits
//! exactly one trial at a time: the trial slot is taken during admission and
//! released when the outcome is recorded or the [`CallPermit`] is dropped.
//!
//! The monotonic [`Clock::now`] drives every decision; wall-clock time is
//! only read for the timestamps reported in [`CircuitStats`].

mod config;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

use bulwark_common::error::ErrorClassification;
use bulwark_common::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

pub use self::config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, ErrorDisposition};
use crate::observability::{default_sink, EventKind, ResilienceEvent, SharedSink};

/// Circuit breaker phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitPhase {
    /// Calls flow through; failures are counted
    Closed,
    /// Calls are rejected without running the work
    Open,
    /// One trial call at a time probes for recovery
    HalfOpen,
}

impl CircuitPhase {
    /// Upper-case label used in logs and stats.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a breaker rejects a call without running it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{name}' is open")]
pub struct CircuitOpenError {
    /// Breaker that rejected the call
    pub name: String,
    /// Remaining cooldown, or `None` while a half-open trial is in flight
    pub retry_after: Option<Duration>,
}

impl CircuitOpenError {
    /// Error kind reported by [`ErrorClassification`].
    pub const KIND: &'static str = "circuit_open";
}

impl ErrorClassification for CircuitOpenError {
    fn error_kind(&self) -> &'static str {
        Self::KIND
    }
}

/// Read-only snapshot of one breaker.
///
/// `failure_count` is the number of failures inside the window as of the
/// most recent recorded failure; taking a snapshot never prunes or
/// transitions, so two snapshots with no call in between are identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    /// Breaker name
    pub name: String,
    /// Current phase
    pub phase: CircuitPhase,
    /// Failures currently inside the window
    pub failure_count: u32,
    /// Configured failure threshold
    pub failure_threshold: u32,
    /// Half-open successes so far
    pub success_count: u32,
    /// Configured success threshold
    pub success_threshold: u32,
    /// When the breaker last entered OPEN
    pub opened_at: Option<DateTime<Utc>>,
    /// When the last counted failure was recorded
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Calls presented to the breaker, admitted or not
    pub total_calls: u64,
    /// Calls rejected without running
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    phase: CircuitPhase,
    failure_timestamps: VecDeque<Instant>,
    success_count: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<SystemTime>,
    last_failure_time: Option<SystemTime>,
    trial_in_flight: bool,
    generation: u64,
    total_calls: u64,
    rejected_calls: u64,
}

impl BreakerState {
    const fn new() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failure_timestamps: VecDeque::new(),
            success_count: 0,
            opened_at: None,
            opened_at_wall: None,
            last_failure_time: None,
            trial_in_flight: false,
            generation: 0,
            total_calls: 0,
            rejected_calls: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failure_timestamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.failure_timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn open(&mut self, now: Instant, wall: SystemTime) {
        self.phase = CircuitPhase::Open;
        self.opened_at = Some(now);
        self.opened_at_wall = Some(wall);
        self.failure_timestamps.clear();
        self.success_count = 0;
        self.trial_in_flight = false;
        self.generation = self.generation.wrapping_add(1);
    }

    fn close(&mut self) {
        self.phase = CircuitPhase::Closed;
        self.failure_timestamps.clear();
        self.success_count = 0;
        self.opened_at = None;
        self.opened_at_wall = None;
        self.trial_in_flight = false;
        self.generation = self.generation.wrapping_add(1);
    }

    fn failure_count(&self) -> u32 {
        u32::try_from(self.failure_timestamps.len()).unwrap_or(u32::MAX)
    }
}

/// A named circuit breaker.
///
/// ```rust
/// use bulwark_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitPhase};
/// use bulwark_core::ResilienceError;
///
/// let config = CircuitBreakerConfig::builder("inventory").failure_threshold(1).build()?;
/// let breaker = CircuitBreaker::new(config);
///
/// let failed: Result<(), ResilienceError<std::io::Error>> =
///     breaker.call_blocking(|| Err(ResilienceError::Operation(std::io::Error::other("down"))));
/// assert!(failed.is_err());
/// assert_eq!(breaker.phase(), CircuitPhase::Open);
/// # Ok::<(), bulwark_common::ConfigError>(())
/// ```
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    clock: C,
    state: Mutex<BreakerState>,
    sink: SharedSink,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name())
            .field("phase", &self.phase())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker reading time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        Self { config, clock, state: Mutex::new(BreakerState::new()), sink: default_sink() }
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Configuration captured at construction.
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current phase. Does not perform the OPEN → HALF_OPEN transition;
    /// that only happens when a call arrives.
    pub fn phase(&self) -> CircuitPhase {
        self.state.lock().phase
    }

    /// Side-effect free snapshot.
    pub fn stats(&self) -> CircuitStats {
        let state = self.state.lock();
        CircuitStats {
            name: self.config.name().to_owned(),
            phase: state.phase,
            failure_count: state.failure_count(),
            failure_threshold: self.config.failure_threshold(),
            success_count: state.success_count,
            success_threshold: self.config.success_threshold(),
            opened_at: state.opened_at_wall.map(DateTime::<Utc>::from),
            last_failure_time: state.last_failure_time.map(DateTime::<Utc>::from),
            total_calls: state.total_calls,
            rejected_calls: state.rejected_calls,
        }
    }

    /// Force the breaker back to CLOSED and clear all counters.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            let generation = state.generation.wrapping_add(1);
            *state = BreakerState::new();
            state.generation = generation;
        }
        self.emit(self.event(EventKind::CircuitReset).with_phase(CircuitPhase::Closed));
    }

    /// Admission step: decide whether a call may run now.
    ///
    /// On success the returned permit must be settled with
    /// [`CallPermit::record_success`] or [`CallPermit::record_error`];
    /// dropping it unsettled frees a half-open trial slot without changing
    /// state. Permits outlive transitions harmlessly: once the breaker has
    /// opened, closed or been reset, settling or dropping an older permit
    /// records nothing.
    pub fn try_acquire(&self) -> Result<CallPermit<'_, C>, CircuitOpenError> {
        let now = self.clock.now();
        let recovery = self.config.recovery_timeout();

        let (admission, event, generation) = {
            let mut state = self.state.lock();
            state.total_calls = state.total_calls.saturating_add(1);

            let (admission, event) = match state.phase {
                CircuitPhase::Closed => (Ok(false), None),
                CircuitPhase::Open => {
                    let elapsed =
                        state.opened_at.map_or(recovery, |at| now.saturating_duration_since(at));
                    if elapsed >= recovery {
                        state.phase = CircuitPhase::HalfOpen;
                        state.success_count = 0;
                        state.trial_in_flight = true;
                        (Ok(true), Some(EventKind::CircuitHalfOpened))
                    } else {
                        state.rejected_calls = state.rejected_calls.saturating_add(1);
                        (Err(Some(recovery - elapsed)), Some(EventKind::CircuitRejected))
                    }
                }
                CircuitPhase::HalfOpen => {
                    if state.trial_in_flight {
                        state.rejected_calls = state.rejected_calls.saturating_add(1);
                        (Err(None), Some(EventKind::CircuitRejected))
                    } else {
                        state.trial_in_flight = true;
                        (Ok(true), None)
                    }
                }
            };
            (admission, event, state.generation)
        };

        match admission {
            Ok(trial) => {
                if let Some(kind) = event {
                    self.emit(self.event(kind).with_phase(CircuitPhase::HalfOpen));
                }
                Ok(CallPermit { breaker: self, trial, generation, settled: false })
            }
            Err(retry_after) => {
                if let Some(kind) = event {
                    let phase = if retry_after.is_some() { CircuitPhase::Open } else { CircuitPhase::HalfOpen };
                    self.emit(self.event(kind).with_phase(phase).with_error_kind(CircuitOpenError::KIND));
                }
                Err(CircuitOpenError { name: self.config.name().to_owned(), retry_after })
            }
        }
    }

    /// Run async `work` under the breaker.
    ///
    /// Rejections surface as `E::from(CircuitOpenError)`; the work's own
    /// errors are returned unchanged.
    #[instrument(skip_all, fields(breaker = %self.config.name()))]
    pub async fn call<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + From<CircuitOpenError>,
    {
        let permit = self.try_acquire()?;
        permit.settle(work().await)
    }

    /// Run async `work`, substituting `fallback` for rejections and counted
    /// failures.
    ///
    /// The fallback masks the real error from the caller; it is only
    /// visible through the event sink and [`stats`](Self::stats). Ignored
    /// and uncounted kinds are still returned as errors.
    #[instrument(skip_all, fields(breaker = %self.config.name()))]
    pub async fn call_with_fallback<F, Fut, T, E, FB>(&self, work: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + From<CircuitOpenError>,
        FB: FnOnce(E) -> T,
    {
        match self.try_acquire() {
            Ok(permit) => permit.settle_or_fallback(work().await, fallback),
            Err(open) => Ok(self.run_fallback(E::from(open), fallback)),
        }
    }

    /// Blocking counterpart of [`call`](Self::call).
    #[instrument(skip_all, fields(breaker = %self.config.name()))]
    pub fn call_blocking<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: ErrorClassification + From<CircuitOpenError>,
    {
        let permit = self.try_acquire()?;
        permit.settle(work())
    }

    /// Blocking counterpart of [`call_with_fallback`](Self::call_with_fallback).
    #[instrument(skip_all, fields(breaker = %self.config.name()))]
    pub fn call_blocking_with_fallback<F, T, E, FB>(&self, work: F, fallback: FB) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: ErrorClassification + From<CircuitOpenError>,
        FB: FnOnce(E) -> T,
    {
        match self.try_acquire() {
            Ok(permit) => permit.settle_or_fallback(work(), fallback),
            Err(open) => Ok(self.run_fallback(E::from(open), fallback)),
        }
    }

    fn run_fallback<T, E: ErrorClassification>(&self, error: E, fallback: impl FnOnce(E) -> T) -> T {
        let phase = self.phase();
        self.emit(self.event(EventKind::CircuitFallback).with_phase(phase).with_error_kind(error.error_kind()));
        fallback(error)
    }

    fn on_success(&self, trial: bool, generation: u64) {
        let closed = {
            let mut state = self.state.lock();
            if trial && state.phase == CircuitPhase::HalfOpen && state.generation == generation {
                state.trial_in_flight = false;
                state.success_count = state.success_count.saturating_add(1);
                if state.success_count >= self.config.success_threshold() {
                    state.close();
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };

        if closed {
            self.emit(self.event(EventKind::CircuitClosed).with_phase(CircuitPhase::Closed));
        }
    }

    fn on_error(&self, trial: bool, generation: u64, kind: &'static str) -> ErrorDisposition {
        let disposition = self.config.classify(kind);
        if disposition != ErrorDisposition::Counted {
            self.release_trial(trial, generation);
            if disposition == ErrorDisposition::Ignored {
                let phase = self.phase();
                self.emit(self.event(EventKind::CircuitErrorIgnored).with_phase(phase).with_error_kind(kind));
            }
            return disposition;
        }

        let now = self.clock.now();
        let wall = self.clock.system_time();
        let recorded = {
            let mut state = self.state.lock();
            if state.generation != generation {
                None
            } else {
                state.last_failure_time = Some(wall);

                let opened = match state.phase {
                    CircuitPhase::Closed => {
                        state.failure_timestamps.push_back(now);
                        state.prune(now, self.config.failure_window());
                        if state.failure_count() >= self.config.failure_threshold() {
                            state.open(now, wall);
                            true
                        } else {
                            false
                        }
                    }
                    CircuitPhase::HalfOpen if trial => {
                        state.open(now, wall);
                        true
                    }
                    CircuitPhase::HalfOpen | CircuitPhase::Open => false,
                };
                Some((state.phase, opened))
            }
        };

        if let Some((phase, opened)) = recorded {
            self.emit(self.event(EventKind::CircuitFailureRecorded).with_phase(phase).with_error_kind(kind));
            if opened {
                self.emit(
                    self.event(EventKind::CircuitOpened).with_phase(CircuitPhase::Open).with_error_kind(kind),
                );
            }
        }
        disposition
    }

    fn release_trial(&self, trial: bool, generation: u64) {
        if trial {
            let mut state = self.state.lock();
            if state.phase == CircuitPhase::HalfOpen && state.generation == generation {
                state.trial_in_flight = false;
            }
        }
    }

    fn event(&self, kind: EventKind) -> ResilienceEvent {
        ResilienceEvent::new(kind, self.config.name())
    }

    fn emit(&self, event: ResilienceEvent) {
        self.sink.record(&event);
    }
}

/// Permission to run one call, obtained from [`CircuitBreaker::try_acquire`].
#[must_use = "an unsettled permit records nothing"]
pub struct CallPermit<'a, C: Clock = SystemClock> {
    breaker: &'a CircuitBreaker<C>,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl<C: Clock> fmt::Debug for CallPermit<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name())
            .field("trial", &self.trial)
            .finish()
    }
}

impl<C: Clock> CallPermit<'_, C> {
    /// Whether this call is the half-open trial.
    pub const fn is_trial(&self) -> bool {
        self.trial
    }

    /// Record a successful outcome.
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial, self.generation);
    }

    /// Record a failed outcome and report how the breaker treated it.
    pub fn record_error<E: ErrorClassification + ?Sized>(mut self, error: &E) -> ErrorDisposition {
        self.settled = true;
        self.breaker.on_error(self.trial, self.generation, error.error_kind())
    }

    fn settle<T, E: ErrorClassification>(self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => self.record_success(),
            Err(error) => {
                self.record_error(error);
            }
        }
        result
    }

    fn settle_or_fallback<T, E: ErrorClassification>(
        self,
        result: Result<T, E>,
        fallback: impl FnOnce(E) -> T,
    ) -> Result<T, E> {
        let breaker = self.breaker;
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => match self.record_error(&error) {
                ErrorDisposition::Counted => Ok(breaker.run_fallback(error, fallback)),
                ErrorDisposition::NotCounted | ErrorDisposition::Ignored => Err(error),
            },
        }
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial(self.trial, self.generation);
        }
    }
}

#[cfg(test)]
mod tests;
