//! Real and mock clocks.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Get current instant (monotonic time)
    ///
    /// Used for every elapsed-time comparison.
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    ///
    /// Only used for reporting, never for ordering decisions.
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient sharing
impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Time only moves when [`advance`](Self::advance) or
/// [`set_elapsed`](Self::set_elapsed) is called. Clones share the same
/// timeline, so a clone handed to a circuit breaker observes every advance
/// made through the original.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bulwark_common::time::{Clock, MockClock};
///
/// let clock = MockClock::new();
/// let observer = clock.clone();
/// let start = observer.now();
///
/// clock.advance(Duration::from_secs(5));
///
/// assert_eq!(observer.now().duration_since(start), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
    base_system_time: SystemTime,
}

impl MockClock {
    /// Create a new mock clock anchored at the current real time.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            base_system_time: SystemTime::now(),
        }
    }

    /// Advance the mock clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock();
        *elapsed = elapsed.saturating_add(duration);
    }

    /// Advance the mock clock by a number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to an absolute elapsed time.
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// How much time has been simulated since the clock was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.base_system_time + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for time::clock.
    use super::*;

    /// Validates the system clock scenario.
    ///
    /// Assertions:
    /// - Ensures `now2 >= now1` evaluates to true.
    /// - Ensures the epoch millis are positive.
    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        let now1 = clock.now();
        let now2 = clock.now();

        assert!(now2 >= now1);
        assert!(clock.millis_since_epoch() > 0);
    }

    /// Validates `MockClock::advance` for monotonic and wall time.
    ///
    /// Assertions:
    /// - Confirms both `now` and `system_time` move by the advanced amount.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let start = clock.now();
        let start_wall = clock.system_time();

        clock.advance(Duration::from_secs(5));
        clock.advance_millis(250);

        assert_eq!(clock.now().duration_since(start), Duration::from_millis(5_250));
        assert_eq!(
            clock.system_time().duration_since(start_wall).unwrap_or_default(),
            Duration::from_millis(5_250)
        );
    }

    /// Validates `MockClock::set_elapsed` replacing the elapsed offset.
    ///
    /// Assertions:
    /// - Confirms `clock.elapsed()` equals the last value set.
    #[test]
    fn test_mock_clock_set_elapsed() {
        let clock = MockClock::new();

        clock.set_elapsed(Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));

        clock.set_elapsed(Duration::from_secs(20));
        assert_eq!(clock.elapsed(), Duration::from_secs(20));
    }

    /// Validates that clones and `Arc` wrappers share one timeline.
    ///
    /// Assertions:
    /// - Confirms an advance on the original is visible through both.
    #[test]
    fn test_mock_clock_shared_timeline() {
        let clock = MockClock::new();
        let clone = clock.clone();
        let shared: Arc<MockClock> = Arc::new(clock.clone());
        let before = shared.now();

        clock.advance(Duration::from_secs(30));

        assert_eq!(clone.elapsed(), Duration::from_secs(30));
        assert_eq!(shared.now().duration_since(before), Duration::from_secs(30));
    }
}
