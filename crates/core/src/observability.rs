//! Structured event side-channel.
//!
//! Every retry attempt and every circuit transition produces a
//! [`ResilienceEvent`] that is handed to an injected [`EventSink`]. The
//! default sink forwards events to `tracing`; applications plug in their own
//! sink to feed monitoring, and tests use [`RecordingEventSink`] to assert on
//! what happened.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitPhase;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An attempt failed with a retryable error and a retry is scheduled.
    RetryScheduled,
    /// The final attempt failed; the last error is being returned.
    RetryExhausted,
    /// An attempt failed with a non-retryable error.
    RetryAborted,
    /// The work succeeded after at least one failed attempt.
    RetryRecovered,
    /// A breaker tripped into OPEN.
    CircuitOpened,
    /// A breaker admitted a trial call after its recovery timeout.
    CircuitHalfOpened,
    /// A breaker recovered to CLOSED.
    CircuitClosed,
    /// A call was rejected without running the work.
    CircuitRejected,
    /// A counted failure was recorded against the breaker.
    CircuitFailureRecorded,
    /// An error of an ignored kind passed through untouched.
    CircuitErrorIgnored,
    /// A fallback result replaced the real outcome.
    CircuitFallback,
    /// A breaker was manually forced back to CLOSED.
    CircuitReset,
}

impl EventKind {
    /// Stable label used as the `event` field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RetryScheduled => "retry_scheduled",
            Self::RetryExhausted => "retry_exhausted",
            Self::RetryAborted => "retry_aborted",
            Self::RetryRecovered => "retry_recovered",
            Self::CircuitOpened => "circuit_opened",
            Self::CircuitHalfOpened => "circuit_half_opened",
            Self::CircuitClosed => "circuit_closed",
            Self::CircuitRejected => "circuit_rejected",
            Self::CircuitFailureRecorded => "circuit_failure_recorded",
            Self::CircuitErrorIgnored => "circuit_error_ignored",
            Self::CircuitFallback => "circuit_fallback",
            Self::CircuitReset => "circuit_reset",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured record: `{event, name, attempt?, delay?, phase?, error_kind?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResilienceEvent {
    /// What happened
    pub kind: EventKind,
    /// Breaker name or retry operation name
    pub name: String,
    /// 1-based attempt index for retry events
    pub attempt: Option<u32>,
    /// Backoff delay before the next attempt
    pub delay: Option<Duration>,
    /// Breaker phase after the event
    pub phase: Option<CircuitPhase>,
    /// Kind of the error that triggered the event
    pub error_kind: Option<&'static str>,
}

impl ResilienceEvent {
    /// Create an event carrying only its kind and name.
    pub fn new(kind: EventKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into(), attempt: None, delay: None, phase: None, error_kind: None }
    }

    /// Attach an attempt index.
    #[must_use]
    pub const fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attach a backoff delay.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attach a breaker phase.
    #[must_use]
    pub const fn with_phase(mut self, phase: CircuitPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attach an error kind.
    #[must_use]
    pub const fn with_error_kind(mut self, error_kind: &'static str) -> Self {
        self.error_kind = Some(error_kind);
        self
    }

    /// Flatten into key/value pairs, omitting absent fields.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("event", self.kind.as_str().to_owned()), ("name", self.name.clone())];
        if let Some(attempt) = self.attempt {
            fields.push(("attempt", attempt.to_string()));
        }
        if let Some(delay) = self.delay {
            fields.push(("delay_ms", delay.as_millis().to_string()));
        }
        if let Some(phase) = self.phase {
            fields.push(("phase", phase.as_str().to_owned()));
        }
        if let Some(kind) = self.error_kind {
            fields.push(("error_kind", kind.to_owned()));
        }
        fields
    }
}

/// Receiver of structured resilience events.
///
/// Sinks are called synchronously on the caller's thread and never while a
/// breaker lock is held, so an implementation may query breaker stats.
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Record one event.
    fn record(&self, event: &ResilienceEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn record(&self, event: &ResilienceEvent) {
        (**self).record(event);
    }
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn EventSink>;

/// Default sink used when none is injected.
pub fn default_sink() -> SharedSink {
    Arc::new(TracingEventSink)
}

/// Forwards events to `tracing`.
///
/// Openings, rejections, exhaustion and aborts log at `warn`; recoveries at
/// `info`; everything else at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: &ResilienceEvent) {
        let delay_ms = event.delay.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let phase = event.phase.map(CircuitPhase::as_str);

        match event.kind {
            EventKind::CircuitOpened
            | EventKind::CircuitRejected
            | EventKind::RetryExhausted
            | EventKind::RetryAborted => warn!(
                event = event.kind.as_str(),
                name = %event.name,
                attempt = event.attempt,
                delay_ms = delay_ms,
                phase = phase,
                error_kind = event.error_kind,
                "resilience event"
            ),
            EventKind::CircuitClosed | EventKind::RetryRecovered | EventKind::CircuitReset => info!(
                event = event.kind.as_str(),
                name = %event.name,
                attempt = event.attempt,
                phase = phase,
                "resilience event"
            ),
            _ => debug!(
                event = event.kind.as_str(),
                name = %event.name,
                attempt = event.attempt,
                delay_ms = delay_ms,
                phase = phase,
                error_kind = event.error_kind,
                "resilience event"
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn record(&self, _event: &ResilienceEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl RecordingEventSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Recorded events of one kind.
    pub fn events_of(&self, kind: EventKind) -> Vec<ResilienceEvent> {
        self.events.lock().iter().filter(|event| event.kind == kind).cloned().collect()
    }

    /// Number of recorded events of one kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|event| event.kind == kind).count()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn record(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}
