//! Deadline enforcement for a single invocation.
//!
//! Two variants cover the two concurrency models callers run in:
//!
//! - **async** (`runtime` feature): [`with_timeout`] races the future against
//!   a tokio timer and drops it on expiry; [`spawn_with_timeout`] runs the
//!   work as its own task and aborts the task on expiry. Cancellation is
//!   cooperative: work only stops at its next `.await`.
//! - **blocking**: [`with_timeout_blocking`] runs the closure on a worker
//!   thread and waits at most `timeout` for its result.
//!
//! # Blocking limitation
//!
//! Arbitrary blocking code cannot be preempted. When the deadline passes the
//! caller is released with [`DeadlineExceeded`] immediately, but the worker
//! thread keeps running until the closure returns on its own; its eventual
//! result is discarded.
//!
//! No partial result is ever produced on timeout.

use std::panic;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bulwark_common::error::ErrorClassification;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, warn};

/// The wrapped work did not finish within its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation exceeded its deadline of {timeout:?}")]
pub struct DeadlineExceeded {
    /// The deadline that was exceeded
    pub timeout: Duration,
}

impl DeadlineExceeded {
    /// Error kind reported by [`ErrorClassification`].
    pub const KIND: &'static str = "deadline_exceeded";

    /// Create the error for a given deadline.
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ErrorClassification for DeadlineExceeded {
    fn error_kind(&self) -> &'static str {
        Self::KIND
    }
}

/// A deadline that can be applied in either concurrency model.
///
/// ```rust
/// use std::time::Duration;
///
/// use bulwark_core::timeout::{DeadlineExceeded, TimeoutEnforcer};
///
/// let enforcer = TimeoutEnforcer::new(Duration::from_secs(1));
/// let value: Result<u32, DeadlineExceeded> = enforcer.run_blocking(|| Ok(7));
/// assert_eq!(value, Ok(7));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutEnforcer {
    timeout: Duration,
}

impl TimeoutEnforcer {
    /// Create an enforcer for `timeout`.
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The enforced deadline.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `work` with the deadline, cancelling it by drop on expiry.
    #[cfg(feature = "runtime")]
    pub async fn run<Fut, T, E>(&self, work: Fut) -> Result<T, E>
    where
        Fut: std::future::Future<Output = Result<T, E>>,
        E: From<DeadlineExceeded>,
    {
        with_timeout(work, self.timeout).await
    }

    /// Run `work` as a spawned task, aborting the task on expiry.
    #[cfg(feature = "runtime")]
    pub async fn spawn<Fut, T, E>(&self, work: Fut) -> Result<T, E>
    where
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<DeadlineExceeded> + Send + 'static,
    {
        spawn_with_timeout(work, self.timeout).await
    }

    /// Run `work` on a worker thread, waiting at most the deadline.
    pub fn run_blocking<F, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<DeadlineExceeded> + Send + 'static,
    {
        with_timeout_blocking(work, self.timeout)
    }
}

/// Await `work` for at most `timeout`.
///
/// On expiry the future is dropped, which cancels it at its current
/// suspension point.
#[cfg(feature = "runtime")]
pub async fn with_timeout<Fut, T, E>(work: Fut, timeout: Duration) -> Result<T, E>
where
    Fut: std::future::Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_elapsed) => {
            warn!(timeout_ms = millis(timeout), "operation exceeded deadline");
            Err(DeadlineExceeded::new(timeout).into())
        }
    }
}

/// Run `work` as a separate tokio task for at most `timeout`.
///
/// The task is aborted on expiry. A panic inside the task is resumed on the
/// caller.
#[cfg(feature = "runtime")]
pub async fn spawn_with_timeout<Fut, T, E>(work: Fut, timeout: Duration) -> Result<T, E>
where
    Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<DeadlineExceeded> + Send + 'static,
{
    let mut handle = tokio::spawn(work);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            if join_error.is_panic() {
                panic::resume_unwind(join_error.into_panic());
            }
            // Cancelled from outside, e.g. runtime shutdown.
            Err(DeadlineExceeded::new(timeout).into())
        }
        Err(_elapsed) => {
            handle.abort();
            warn!(timeout_ms = millis(timeout), "spawned operation exceeded deadline; task aborted");
            Err(DeadlineExceeded::new(timeout).into())
        }
    }
}

/// Run `work` on a worker thread, blocking the caller for at most `timeout`.
///
/// See the module docs for what happens to the worker after a timeout.
/// If the OS refuses to spawn a thread, `work` runs on the calling thread
/// without a deadline.
pub fn with_timeout_blocking<F, T, E>(work: F, timeout: Duration) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DeadlineExceeded> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let slot = Arc::new(Mutex::new(Some(work)));
    let worker_slot = Arc::clone(&slot);

    let spawned = thread::Builder::new().name("bulwark-deadline".to_owned()).spawn(move || {
        let work = worker_slot.lock().take();
        if let Some(work) = work {
            // The receiver is gone once the caller timed out.
            let _ = tx.send(work());
        }
    });

    let handle = match spawned {
        Ok(handle) => handle,
        Err(spawn_error) => {
            error!(error = %spawn_error, "failed to spawn deadline worker; running inline");
            return match slot.lock().take() {
                Some(work) => work(),
                None => Err(DeadlineExceeded::new(timeout).into()),
            };
        }
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                timeout_ms = millis(timeout),
                "blocking operation exceeded deadline; worker continues in background"
            );
            Err(DeadlineExceeded::new(timeout).into())
        }
        Err(RecvTimeoutError::Disconnected) => match handle.join() {
            Err(payload) => panic::resume_unwind(payload),
            Ok(()) => Err(DeadlineExceeded::new(timeout).into()),
        },
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    //! Unit tests for deadline enforcement.
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum WorkError {
        Failed,
        Deadline(Duration),
    }

    impl From<DeadlineExceeded> for WorkError {
        fn from(err: DeadlineExceeded) -> Self {
            Self::Deadline(err.timeout)
        }
    }

    // ========================================================================
    // Blocking variant
    // ========================================================================

    /// Validates fast blocking work returns its own result.
    ///
    /// Assertions:
    /// - Confirms success and failure values pass through unchanged.
    #[test]
    fn test_blocking_within_deadline() {
        let ok: Result<u32, WorkError> = with_timeout_blocking(|| Ok(42), Duration::from_secs(1));
        let failed: Result<u32, WorkError> =
            with_timeout_blocking(|| Err(WorkError::Failed), Duration::from_secs(1));

        assert_eq!(ok, Ok(42));
        assert_eq!(failed, Err(WorkError::Failed));
    }

    /// Validates slow blocking work releases the caller at the deadline.
    ///
    /// Assertions:
    /// - Confirms `DeadlineExceeded` carries the configured timeout.
    /// - Confirms the caller returned well before the work would finish.
    #[test]
    fn test_blocking_deadline_exceeded() {
        let started = Instant::now();
        let result: Result<(), WorkError> = with_timeout_blocking(
            || {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            },
            Duration::from_millis(20),
        );

        assert_eq!(result, Err(WorkError::Deadline(Duration::from_millis(20))));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    /// Validates the worker keeps running after the caller is released.
    ///
    /// Assertions:
    /// - Confirms the side effect of the abandoned worker eventually lands.
    #[test]
    fn test_blocking_worker_continues_after_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let result: Result<(), WorkError> = with_timeout_blocking(
            move || {
                thread::sleep(Duration::from_millis(60));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(5),
        );
        assert!(result.is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !finished.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    /// Validates a panicking worker re-raises on the caller.
    #[test]
    fn test_blocking_panic_propagates() {
        let outcome = panic::catch_unwind(|| {
            let _: Result<(), WorkError> =
                with_timeout_blocking(|| panic!("worker exploded"), Duration::from_secs(1));
        });
        assert!(outcome.is_err());
    }

    // ========================================================================
    // Async variant
    // ========================================================================

    /// Validates async work that finishes first wins the race.
    #[cfg(feature = "runtime")]
    #[tokio::test(start_paused = true)]
    async fn test_async_within_deadline() {
        let result: Result<&str, WorkError> = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("done")
            },
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(result, Ok("done"));
    }

    /// Validates async work slower than the deadline is cancelled.
    ///
    /// Assertions:
    /// - Confirms `DeadlineExceeded` is produced.
    /// - Confirms the work never reached its completion point.
    #[cfg(feature = "runtime")]
    #[tokio::test(start_paused = true)]
    async fn test_async_deadline_cancels_future() {
        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);

        let result: Result<(), WorkError> = TimeoutEnforcer::new(Duration::from_secs(1))
            .run(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(result, Err(WorkError::Deadline(Duration::from_secs(1))));
        assert!(!completed.load(Ordering::SeqCst));
    }

    /// Validates spawned work is aborted on expiry.
    #[cfg(feature = "runtime")]
    #[tokio::test(start_paused = true)]
    async fn test_spawned_task_aborted() {
        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);

        let result: Result<(), WorkError> = spawn_with_timeout(
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(100),
        )
        .await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(result.is_err());
        assert!(!completed.load(Ordering::SeqCst));
    }

    /// Validates spawned work within its deadline returns its value.
    #[cfg(feature = "runtime")]
    #[tokio::test]
    async fn test_spawned_task_completes() {
        let result: Result<u8, WorkError> =
            TimeoutEnforcer::new(Duration::from_secs(5)).spawn(async { Ok(9) }).await;
        assert_eq!(result, Ok(9));
    }
}
