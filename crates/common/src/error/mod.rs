//! Error classification and configuration errors shared across bulwark crates.
//!
//! Every resilience policy in the workspace makes its decisions from a single
//! piece of information about a failure: its **error kind**, a stable
//! `snake_case` label returned by [`ErrorClassification::error_kind`]. Retry
//! policies exclude kinds from retrying, circuit breakers count or ignore
//! failures by kind, and the structured event stream reports the kind of
//! every failure it observes.
//!
//! ## Implementing `ErrorClassification`
//!
//! ```rust
//! use bulwark_common::error::ErrorClassification;
//!
//! #[derive(Debug, thiserror::Error)]
//! pub enum StoreError {
//!     #[error("connection reset by peer")]
//!     ConnectionReset,
//!     #[error("record {0} not found")]
//!     NotFound(u64),
//! }
//!
//! impl ErrorClassification for StoreError {
//!     fn error_kind(&self) -> &'static str {
//!         match self {
//!             Self::ConnectionReset => "connection_reset",
//!             Self::NotFound(_) => "not_found",
//!         }
//!     }
//! }
//!
//! assert_eq!(StoreError::NotFound(7).error_kind(), "not_found");
//! ```

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Standard interface for labelling errors by kind.
///
/// Kinds should be short, stable and `snake_case` (`"timed_out"`,
/// `"rate_limited"`). They are compared as plain strings, so two error types
/// that report the same kind are treated identically by every policy.
pub trait ErrorClassification {
    /// Stable label identifying what class of failure this is.
    fn error_kind(&self) -> &'static str;
}

impl<T: ErrorClassification + ?Sized> ErrorClassification for &T {
    fn error_kind(&self) -> &'static str {
        (**self).error_kind()
    }
}

impl<T: ErrorClassification + ?Sized> ErrorClassification for Box<T> {
    fn error_kind(&self) -> &'static str {
        (**self).error_kind()
    }
}

impl<T: ErrorClassification + ?Sized> ErrorClassification for Arc<T> {
    fn error_kind(&self) -> &'static str {
        (**self).error_kind()
    }
}

impl ErrorClassification for io::Error {
    fn error_kind(&self) -> &'static str {
        match self.kind() {
            io::ErrorKind::NotFound => "not_found",
            io::ErrorKind::PermissionDenied => "permission_denied",
            io::ErrorKind::ConnectionRefused => "connection_refused",
            io::ErrorKind::ConnectionReset => "connection_reset",
            io::ErrorKind::ConnectionAborted => "connection_aborted",
            io::ErrorKind::NotConnected => "not_connected",
            io::ErrorKind::AddrInUse => "addr_in_use",
            io::ErrorKind::AddrNotAvailable => "addr_not_available",
            io::ErrorKind::BrokenPipe => "broken_pipe",
            io::ErrorKind::AlreadyExists => "already_exists",
            io::ErrorKind::WouldBlock => "would_block",
            io::ErrorKind::InvalidInput => "invalid_input",
            io::ErrorKind::InvalidData => "invalid_data",
            io::ErrorKind::TimedOut => "timed_out",
            io::ErrorKind::Interrupted => "interrupted",
            io::ErrorKind::UnexpectedEof => "unexpected_eof",
            io::ErrorKind::Unsupported => "unsupported",
            io::ErrorKind::OutOfMemory => "out_of_memory",
            _ => "io",
        }
    }
}

/// Result alias for configuration construction.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Raised when a policy or configuration value violates its invariants.
///
/// Builders return this from `build()` so invalid policies are rejected at
/// construction time, never at call time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Human readable description of the violated constraint.
        message: String,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

impl ErrorClassification for ConfigError {
    fn error_kind(&self) -> &'static str {
        "invalid_config"
    }
}
