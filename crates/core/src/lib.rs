//! # Bulwark Core
//!
//! Resilience wrappers for fallible work: backoff computation, deadlines,
//! circuit breaking, retry and their composition.
//!
//! ## Modules
//! - [`backoff`]: delay before each retry (exponential, linear, constant,
//!   optional jitter)
//! - [`timeout`]: bound one execution by a deadline
//! - [`circuit_breaker`]: CLOSED / OPEN / HALF_OPEN state machine over a
//!   sliding failure window
//! - [`registry`]: one shared breaker per name
//! - [`retry`]: repeat work under a [`RetryPolicy`]
//! - [`compose`]: stack the above in a fixed order
//! - [`config`]: TOML / JSON settings
//! - [`observability`]: structured events for every retry and transition
//!
//! ## Composition order
//!
//! When wrappers are stacked, the timeout is innermost, the breaker wraps
//! it and retry is outermost. [`ResiliencePipeline`] enforces this:
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use bulwark_core::{
//!     CircuitBreakerConfig, CircuitRegistry, ResilienceError, ResiliencePipeline, RetryPolicy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CircuitRegistry::new();
//! let pipeline = ResiliencePipeline::builder()
//!     .retry(RetryPolicy::builder().max_attempts(3).build()?)
//!     .circuit_breaker_from(&registry, &CircuitBreakerConfig::builder("search").build()?)
//!     .timeout(Duration::from_secs(2))
//!     .build()?;
//!
//! let hits: Result<u32, ResilienceError<std::io::Error>> =
//!     pipeline.run(|| async { Ok(42) }).await;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod backoff;
pub mod circuit_breaker;
pub mod compose;
pub mod config;
pub mod error;
pub mod observability;
pub mod registry;
pub mod retry;
pub mod timeout;

#[cfg(test)]
mod test_support;

pub use backoff::{Backoff, BackoffStrategy};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitOpenError, CircuitPhase, CircuitStats, ErrorDisposition,
};
pub use compose::{Layer, ResiliencePipeline, ResiliencePipelineBuilder};
pub use config::{
    CircuitBreakerSettings, ResilienceSettings, RetrySettings, SettingsError, SettingsFormat,
};
pub use error::ResilienceError;
pub use observability::{
    EventKind, EventSink, NoOpEventSink, RecordingEventSink, ResilienceEvent, SharedSink,
    TracingEventSink,
};
pub use registry::CircuitRegistry;
pub use retry::{FailureClass, RetryExecutor, RetryOutcome, RetryPolicy, RetryPolicyBuilder};
pub use timeout::{DeadlineExceeded, TimeoutEnforcer};
