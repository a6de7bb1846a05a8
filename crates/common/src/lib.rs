//! Foundation types shared across bulwark crates.
//!
//! # Feature Tiers
//!
//! - always available: [`error`] (error classification, configuration errors)
//!   and [`time`] (clock abstraction with a mock for tests)
//! - `observability` (default): [`observability`] subscriber initialisation
//!   for `tracing`

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod error;
pub mod time;

#[cfg(feature = "observability")]
pub mod observability;

pub use error::{ConfigError, ConfigResult, ErrorClassification};
pub use time::{Clock, MockClock, SystemClock};
