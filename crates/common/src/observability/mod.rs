//! Observability helpers.
//!
//! Library code in this workspace only emits `tracing` events; installing a
//! subscriber is left to the binary. [`logging`] offers a ready-made
//! initialisation for applications that do not bring their own.

pub mod logging;

pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig, LoggingInitError};
