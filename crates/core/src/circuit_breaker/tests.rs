//! Unit tests for the circuit breaker state machine.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use bulwark_common::time::MockClock;

use super::*;
use crate::observability::{EventKind, RecordingEventSink};
use crate::test_support::TestError;

fn scenario_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder("scenario")
        .failure_threshold(5)
        .failure_window(Duration::from_secs(60))
        .recovery_timeout(Duration::from_secs(30))
        .success_threshold(2)
        .ignored_kinds(["not_found"])
        .build()
        .unwrap()
}

fn breaker(clock: &MockClock) -> CircuitBreaker<MockClock> {
    CircuitBreaker::with_clock(scenario_config(), clock.clone())
}

fn fail(breaker: &CircuitBreaker<MockClock>, kind: &'static str) -> Result<(), TestError> {
    breaker.call_blocking(|| Err(TestError::new(kind, 1)))
}

fn succeed(breaker: &CircuitBreaker<MockClock>) -> Result<u32, TestError> {
    breaker.call_blocking(|| Ok(1))
}

fn trip(breaker: &CircuitBreaker<MockClock>, clock: &MockClock) {
    for _ in 0..5 {
        let _ = fail(breaker, "transient");
        clock.advance(Duration::from_secs(2));
    }
    assert_eq!(breaker.phase(), CircuitPhase::Open);
}

// ============================================================================
// CLOSED
// ============================================================================

/// Validates the phase labels.
#[test]
fn test_phase_display() {
    assert_eq!(CircuitPhase::Closed.to_string(), "CLOSED");
    assert_eq!(CircuitPhase::Open.to_string(), "OPEN");
    assert_eq!(CircuitPhase::HalfOpen.to_string(), "HALF_OPEN");
}

/// Validates five failures within ten seconds open the circuit.
///
/// Assertions:
/// - Confirms the breaker stays CLOSED through four failures.
/// - Confirms the fifth failure opens it and clears the failure count.
/// - Confirms `opened_at` is recorded.
#[test]
fn test_consecutive_failures_open_circuit() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);

    for attempt in 1..=4 {
        assert!(fail(&breaker, "transient").is_err());
        assert_eq!(breaker.phase(), CircuitPhase::Closed);
        assert_eq!(breaker.stats().failure_count, attempt);
        clock.advance(Duration::from_secs(2));
    }

    assert!(fail(&breaker, "transient").is_err());
    let stats = breaker.stats();
    assert_eq!(stats.phase, CircuitPhase::Open);
    assert_eq!(stats.failure_count, 0);
    assert!(stats.opened_at.is_some());
    assert!(stats.last_failure_time.is_some());
}

/// Validates failures older than the window no longer count.
///
/// Assertions:
/// - Confirms four old failures plus one fresh failure leave the breaker
///   CLOSED with a count of one.
#[test]
fn test_sliding_window_prunes_old_failures() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);

    for _ in 0..4 {
        let _ = fail(&breaker, "transient");
    }
    clock.advance(Duration::from_secs(61));
    let _ = fail(&breaker, "transient");

    let stats = breaker.stats();
    assert_eq!(stats.phase, CircuitPhase::Closed);
    assert_eq!(stats.failure_count, 1);
}

/// Validates successes in CLOSED do not reset the window.
#[test]
fn test_success_in_closed_is_noop() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);

    let _ = fail(&breaker, "transient");
    let _ = fail(&breaker, "transient");
    assert_eq!(succeed(&breaker), Ok(1));

    assert_eq!(breaker.stats().failure_count, 2);
    assert_eq!(breaker.phase(), CircuitPhase::Closed);
}

// ============================================================================
// OPEN
// ============================================================================

/// Validates that an open circuit rejects without running the work.
///
/// Assertions:
/// - Confirms the rejection maps to the circuit-open kind.
/// - Confirms the work closure never ran.
/// - Confirms `retry_after` reports the remaining cooldown.
#[test]
fn test_open_rejects_without_invoking_work() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);

    let invoked = Cell::new(false);
    let result: Result<(), TestError> = breaker.call_blocking(|| {
        invoked.set(true);
        Ok(())
    });

    assert_eq!(result.unwrap_err().kind, CircuitOpenError::KIND);
    assert!(!invoked.get());

    let rejection = breaker.try_acquire().unwrap_err();
    assert_eq!(rejection.name, "scenario");
    assert_eq!(rejection.retry_after, Some(Duration::from_secs(28)));
    assert_eq!(breaker.stats().rejected_calls, 2);
}

/// Validates a configured fallback replaces the rejection.
#[test]
fn test_open_with_fallback_returns_substitute() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);

    let result: Result<&str, TestError> =
        breaker.call_blocking_with_fallback(|| Ok("live"), |_err| "cached");

    assert_eq!(result, Ok("cached"));
}

// ============================================================================
// HALF_OPEN
// ============================================================================

/// Validates recovery: two half-open successes close the circuit.
///
/// Assertions:
/// - Confirms the first call after the cooldown is the trial.
/// - Confirms one success leaves the breaker HALF_OPEN.
/// - Confirms the second success closes it with counters cleared.
#[test]
fn test_half_open_successes_close_circuit() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);

    clock.advance(Duration::from_secs(30));
    assert_eq!(succeed(&breaker), Ok(1));
    let stats = breaker.stats();
    assert_eq!(stats.phase, CircuitPhase::HalfOpen);
    assert_eq!(stats.success_count, 1);

    assert_eq!(succeed(&breaker), Ok(1));
    let stats = breaker.stats();
    assert_eq!(stats.phase, CircuitPhase::Closed);
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.success_count, 0);
    assert!(stats.opened_at.is_none());
}

/// Validates a half-open failure reopens the circuit with a fresh
/// `opened_at`.
#[test]
fn test_half_open_failure_reopens() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);
    let first_opened = breaker.stats().opened_at;

    clock.advance(Duration::from_secs(30));
    assert_eq!(succeed(&breaker), Ok(1));
    clock.advance(Duration::from_secs(1));
    assert!(fail(&breaker, "transient").is_err());

    let stats = breaker.stats();
    assert_eq!(stats.phase, CircuitPhase::Open);
    assert!(stats.opened_at > first_opened);
    assert_eq!(stats.success_count, 0);

    // The cooldown restarts from the reopen.
    clock.advance(Duration::from_secs(29));
    assert!(breaker.try_acquire().is_err());
}

/// Validates cooldown boundary: 29 seconds after opening rejects, 30 admits.
#[test]
fn test_recovery_timeout_boundary() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);

    // `trip` already moved the clock 2s past the opening failure.
    clock.advance(Duration::from_secs(27));
    assert!(breaker.try_acquire().is_err());
    clock.advance(Duration::from_secs(1));
    let permit = breaker.try_acquire().unwrap();
    assert!(permit.is_trial());
    permit.record_success();
}

/// Validates HALF_OPEN admits exactly one trial at a time.
///
/// Assertions:
/// - Confirms a second acquisition is rejected while the trial is in flight.
/// - Confirms dropping the trial permit unsettled frees the slot.
/// - Confirms the breaker stays HALF_OPEN after the drop.
#[test]
fn test_half_open_single_trial() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);
    clock.advance(Duration::from_secs(30));

    let trial = breaker.try_acquire().unwrap();
    let second = breaker.try_acquire().unwrap_err();
    assert_eq!(second.retry_after, None);

    drop(trial);
    assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
    let next = breaker.try_acquire().unwrap();
    assert!(next.is_trial());
    next.record_success();
    assert_eq!(breaker.stats().success_count, 1);
}

/// Validates concurrent callers racing into HALF_OPEN get one trial.
///
/// Assertions:
/// - Confirms exactly one of the released threads is admitted.
/// - Confirms every other caller is counted as rejected.
#[test]
fn test_half_open_concurrent_admission() {
    const CALLERS: usize = 16;

    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);
    clock.advance(Duration::from_secs(30));

    let start = Barrier::new(CALLERS);
    let hold = Barrier::new(CALLERS);
    let admitted = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..CALLERS {
            scope.spawn(|| {
                start.wait();
                let permit = breaker.try_acquire();
                if permit.is_ok() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
                // Keep the trial in flight until everyone has tried.
                hold.wait();
                drop(permit);
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.stats().rejected_calls, (CALLERS - 1) as u64);
    assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
}

/// Trip, wait out the cooldown and take the trial, twice around a reset.
fn trial_across_reset<'a>(
    breaker: &'a CircuitBreaker<MockClock>,
    clock: &MockClock,
) -> (CallPermit<'a, MockClock>, CallPermit<'a, MockClock>) {
    trip(breaker, clock);
    clock.advance(Duration::from_secs(30));
    let earlier = breaker.try_acquire().unwrap();
    assert!(earlier.is_trial());

    breaker.reset();
    trip(breaker, clock);
    clock.advance(Duration::from_secs(30));
    let current = breaker.try_acquire().unwrap();
    assert!(current.is_trial());

    (earlier, current)
}

/// Validates a trial permit taken before `reset()` cannot touch the next
/// HALF_OPEN episode.
///
/// Assertions:
/// - Confirms dropping it does not free the current trial slot.
/// - Confirms its success does not count toward closing.
/// - Confirms its failure does not reopen the breaker.
#[test]
fn test_permit_from_before_reset_is_inert() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);

    let (earlier, current) = trial_across_reset(&breaker, &clock);
    drop(earlier);
    assert!(breaker.try_acquire().is_err());
    assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
    drop(current);

    breaker.reset();
    let (earlier, current) = trial_across_reset(&breaker, &clock);
    earlier.record_success();
    assert_eq!(breaker.stats().success_count, 0);
    current.record_success();
    assert_eq!(breaker.stats().success_count, 1);

    breaker.reset();
    let (earlier, current) = trial_across_reset(&breaker, &clock);
    assert_eq!(earlier.record_error(&TestError::transient(9)), ErrorDisposition::Counted);
    assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
    assert!(breaker.try_acquire().is_err());
    current.record_success();
    assert_eq!(breaker.stats().success_count, 1);
}

// ============================================================================
// Error kinds
// ============================================================================

/// Validates ignored kinds leave the breaker untouched.
///
/// Assertions:
/// - Confirms the original error reaches the caller unchanged.
/// - Confirms neither the failure count nor the phase changes.
/// - Confirms the fallback is never invoked.
#[test]
fn test_ignored_kind_passes_through() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    let _ = fail(&breaker, "transient");

    let fallback_ran = Cell::new(false);
    let result: Result<u32, TestError> = breaker.call_blocking_with_fallback(
        || Err(TestError::new("not_found", 77)),
        |_err| {
            fallback_ran.set(true);
            0
        },
    );

    assert_eq!(result, Err(TestError::new("not_found", 77)));
    assert!(!fallback_ran.get());
    let stats = breaker.stats();
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.phase, CircuitPhase::Closed);
}

/// Validates an ignored trial outcome keeps HALF_OPEN and frees the slot.
#[test]
fn test_ignored_kind_during_trial() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);
    clock.advance(Duration::from_secs(30));

    assert!(fail(&breaker, "not_found").is_err());
    assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
    assert!(breaker.try_acquire().is_ok());
}

/// Validates restricted failure kinds.
///
/// Assertions:
/// - Confirms kinds outside the set never open the circuit.
/// - Confirms kinds outside the set bypass the fallback.
/// - Confirms listed kinds still count.
#[test]
fn test_restricted_failure_kinds() {
    let config = CircuitBreakerConfig::builder("restricted")
        .failure_threshold(2)
        .failure_kinds(["timed_out"])
        .build()
        .unwrap();
    let breaker = CircuitBreaker::with_clock(config, MockClock::new());

    for _ in 0..5 {
        let result: Result<u32, TestError> =
            breaker.call_blocking_with_fallback(|| Err(TestError::new("invalid_input", 1)), |_| 0);
        assert!(result.is_err());
    }
    assert_eq!(breaker.phase(), CircuitPhase::Closed);
    assert_eq!(breaker.stats().failure_count, 0);

    let _: Result<(), TestError> = breaker.call_blocking(|| Err(TestError::new("timed_out", 1)));
    let substituted: Result<u32, TestError> =
        breaker.call_blocking_with_fallback(|| Err(TestError::new("timed_out", 2)), |_| 9);
    assert_eq!(substituted, Ok(9));
    assert_eq!(breaker.phase(), CircuitPhase::Open);
}

/// Validates the fallback receives the counted failure itself.
#[test]
fn test_fallback_receives_counted_error() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);

    let result: Result<u32, TestError> =
        breaker.call_blocking_with_fallback(|| Err(TestError::new("transient", 5)), |err| err.tag * 10);

    assert_eq!(result, Ok(50));
    assert_eq!(breaker.stats().failure_count, 1);
}

// ============================================================================
// Stats, reset, events
// ============================================================================

/// Validates two snapshots with no intervening call are identical.
#[test]
fn test_stats_idempotent() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);
    clock.advance(Duration::from_secs(120));

    let first = breaker.stats();
    let second = breaker.stats();
    assert_eq!(first, second);
    assert_eq!(first.phase, CircuitPhase::Open);
}

/// Validates snapshots serialize with upper-case phases.
#[test]
fn test_stats_serialize() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);

    let json = serde_json::to_value(breaker.stats()).unwrap();
    assert_eq!(json["phase"], "OPEN");
    assert_eq!(json["failure_threshold"], 5);
    assert!(json["opened_at"].is_string());
}

/// Validates manual reset.
#[test]
fn test_reset_closes_circuit() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);

    breaker.reset();

    let stats = breaker.stats();
    assert_eq!(stats.phase, CircuitPhase::Closed);
    assert_eq!(stats.total_calls, 0);
    assert!(stats.last_failure_time.is_none());
    assert_eq!(succeed(&breaker), Ok(1));
}

/// Validates the transition events emitted across a full cycle.
///
/// Assertions:
/// - Confirms one open, one half-open and one close event.
/// - Confirms each counted failure is reported with its kind.
#[test]
fn test_transition_events() {
    let clock = MockClock::new();
    let sink = Arc::new(RecordingEventSink::new());
    let breaker = breaker(&clock).with_sink(sink.clone());

    trip(&breaker, &clock);
    let _ = succeed(&breaker);
    clock.advance(Duration::from_secs(30));
    let _ = succeed(&breaker);
    let _ = succeed(&breaker);

    assert_eq!(sink.count(EventKind::CircuitFailureRecorded), 5);
    assert_eq!(sink.count(EventKind::CircuitOpened), 1);
    assert_eq!(sink.count(EventKind::CircuitRejected), 1);
    assert_eq!(sink.count(EventKind::CircuitHalfOpened), 1);
    assert_eq!(sink.count(EventKind::CircuitClosed), 1);

    let opened = &sink.events_of(EventKind::CircuitOpened)[0];
    assert_eq!(opened.name, "scenario");
    assert_eq!(opened.phase, Some(CircuitPhase::Open));
    assert_eq!(opened.error_kind, Some("transient"));
}

// ============================================================================
// Async path
// ============================================================================

/// Validates the async call path mirrors the blocking one.
#[cfg(feature = "runtime")]
#[tokio::test]
async fn test_async_call_records_outcomes() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);

    for _ in 0..5 {
        let result: Result<(), TestError> =
            breaker.call(|| async { Err(TestError::transient(1)) }).await;
        assert!(result.is_err());
    }
    assert_eq!(breaker.phase(), CircuitPhase::Open);

    let fallback: Result<&str, TestError> =
        breaker.call_with_fallback(|| async { Ok("live") }, |_| "fallback").await;
    assert_eq!(fallback, Ok("fallback"));

    clock.advance(Duration::from_secs(30));
    let trial: Result<&str, TestError> = breaker.call(|| async { Ok("live") }).await;
    assert_eq!(trial, Ok("live"));
    assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
}

/// Validates a cancelled trial future frees the half-open slot.
#[cfg(feature = "runtime")]
#[tokio::test(start_paused = true)]
async fn test_cancelled_trial_releases_slot() {
    let clock = MockClock::new();
    let breaker = breaker(&clock);
    trip(&breaker, &clock);
    clock.advance(Duration::from_secs(30));

    let slow = breaker.call(|| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<_, TestError>(())
    });
    let timed_out = tokio::time::timeout(Duration::from_secs(1), slow).await;
    assert!(timed_out.is_err());

    assert_eq!(breaker.phase(), CircuitPhase::HalfOpen);
    assert!(breaker.try_acquire().is_ok());
}
