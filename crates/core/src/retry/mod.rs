//! Retry executor.
//!
//! The executor runs a unit of work up to `max_attempts` times in total,
//! sleeping for the policy's backoff between attempts. Attempts are strictly
//! sequential; the only suspension points are the work itself and the
//! backoff sleep. When attempts run out, or a failure is classified
//! permanent, the **last error is returned unchanged**.
//!
//! Every failed attempt emits one structured event:
//! `retry_scheduled` (attempt, delay, error kind) when another attempt
//! follows, `retry_exhausted` on the final attempt and `retry_aborted` for a
//! permanent failure. A success after failures emits `retry_recovered`.

mod policy;

use std::thread;
use std::time::Duration;

use bulwark_common::error::ErrorClassification;
use tracing::instrument;

pub use self::policy::{FailureClass, RetryPolicy, RetryPolicyBuilder, RetryPredicate};
use crate::observability::{default_sink, EventKind, ResilienceEvent, SharedSink};

/// Result of a retry run together with how it got there.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Value of the successful attempt, or the last error
    pub result: Result<T, E>,
    /// Attempts made, including the first call
    pub attempts: u32,
    /// Sum of backoff delays slept
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Discard the statistics.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }

    /// Whether the run ended in success.
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

enum Step {
    Retry(Duration),
    Stop,
}

/// Drives repeated invocation of a unit of work under a [`RetryPolicy`].
///
/// The executor holds no state between runs; one instance can be shared by
/// any number of concurrent callers.
pub struct RetryExecutor<E> {
    name: String,
    policy: RetryPolicy<E>,
    sink: SharedSink,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), policy: self.policy.clone(), sink: self.sink.clone() }
    }
}

impl<E> std::fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<E> RetryExecutor<E> {
    /// Executor named `name` (used as the `name` field of its events).
    pub fn new(name: impl Into<String>, policy: RetryPolicy<E>) -> Self {
        Self { name: name.into(), policy, sink: default_sink() }
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Policy in force.
    pub const fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    pub(crate) fn policy_mut(&mut self) -> &mut RetryPolicy<E> {
        &mut self.policy
    }
}

impl<E: ErrorClassification> RetryExecutor<E> {
    /// Run async `work` with retries.
    #[cfg(feature = "runtime")]
    pub async fn run<F, Fut, T>(&self, work: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.run_with_outcome(work).await.into_result()
    }

    /// Run async `work` with retries, reporting attempt statistics.
    #[cfg(feature = "runtime")]
    #[instrument(skip_all, fields(operation = %self.name, max_attempts = self.policy.max_attempts()))]
    pub async fn run_with_outcome<F, Fut, T>(&self, mut work: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            match work().await {
                Ok(value) => return self.succeeded(value, attempt, total_delay),
                Err(error) => match self.after_failure(attempt, &error) {
                    Step::Retry(delay) => {
                        tokio::time::sleep(delay).await;
                        total_delay = total_delay.saturating_add(delay);
                        attempt += 1;
                    }
                    Step::Stop => return RetryOutcome { result: Err(error), attempts: attempt, total_delay },
                },
            }
        }
    }

    /// Run blocking `work` with retries, sleeping the current thread between
    /// attempts.
    pub fn run_blocking<F, T>(&self, work: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.run_blocking_with_outcome(work).into_result()
    }

    /// Blocking counterpart of [`run_with_outcome`](Self::run_with_outcome).
    #[instrument(skip_all, fields(operation = %self.name, max_attempts = self.policy.max_attempts()))]
    pub fn run_blocking_with_outcome<F, T>(&self, mut work: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            match work() {
                Ok(value) => return self.succeeded(value, attempt, total_delay),
                Err(error) => match self.after_failure(attempt, &error) {
                    Step::Retry(delay) => {
                        thread::sleep(delay);
                        total_delay = total_delay.saturating_add(delay);
                        attempt += 1;
                    }
                    Step::Stop => return RetryOutcome { result: Err(error), attempts: attempt, total_delay },
                },
            }
        }
    }

    fn succeeded<T>(&self, value: T, attempt: u32, total_delay: Duration) -> RetryOutcome<T, E> {
        if attempt > 1 {
            self.sink.record(
                &ResilienceEvent::new(EventKind::RetryRecovered, &self.name)
                    .with_attempt(attempt)
                    .with_delay(total_delay),
            );
        }
        RetryOutcome { result: Ok(value), attempts: attempt, total_delay }
    }

    fn after_failure(&self, attempt: u32, error: &E) -> Step {
        let kind = error.error_kind();
        let event = ResilienceEvent::new(EventKind::RetryScheduled, &self.name)
            .with_attempt(attempt)
            .with_error_kind(kind);

        if self.policy.classify(error) == FailureClass::Permanent {
            self.sink.record(&ResilienceEvent { kind: EventKind::RetryAborted, ..event });
            return Step::Stop;
        }
        if attempt >= self.policy.max_attempts() {
            self.sink.record(&ResilienceEvent { kind: EventKind::RetryExhausted, ..event });
            return Step::Stop;
        }

        let delay = self.policy.delay_for(attempt);
        self.sink.record(&event.with_delay(delay));
        Step::Retry(delay)
    }
}

/// Run async `work` under `policy`.
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::time::Duration;
///
/// use bulwark_core::retry::{with_retry, RetryPolicy};
///
/// let policy = RetryPolicy::builder()
///     .max_attempts(3)
///     .base_delay(Duration::from_millis(1))
///     .max_delay(Duration::from_millis(5))
///     .build()?;
///
/// let mut calls = 0;
/// let value = with_retry(
///     || {
///         calls += 1;
///         let attempt = calls;
///         async move {
///             if attempt < 3 {
///                 Err(std::io::Error::from(std::io::ErrorKind::TimedOut))
///             } else {
///                 Ok(attempt)
///             }
///         }
///     },
///     &policy,
/// )
/// .await?;
/// assert_eq!(value, 3);
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "runtime")]
pub async fn with_retry<F, Fut, T, E>(work: F, policy: &RetryPolicy<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: ErrorClassification,
{
    RetryExecutor::new("retry", policy.clone()).run(work).await
}

/// Run blocking `work` under `policy`.
pub fn with_retry_blocking<F, T, E>(work: F, policy: &RetryPolicy<E>) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: ErrorClassification,
{
    RetryExecutor::new("retry", policy.clone()).run_blocking(work)
}
