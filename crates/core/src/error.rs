//! Ready-made error wrapper for callers that do not want to extend their own
//! error type.
//!
//! Every wrapper in this crate is generic over the caller's error `E` and
//! only asks for `From<CircuitOpenError>` and/or `From<DeadlineExceeded>`.
//! [`ResilienceError`] provides those conversions around any error type.

use std::error::Error;

use bulwark_common::error::ErrorClassification;
use thiserror::Error;

use crate::circuit_breaker::CircuitOpenError;
use crate::timeout::DeadlineExceeded;

/// Either a synthetic resilience failure or the operation's own error.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: Error + 'static,
{
    /// The breaker rejected the call
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The deadline passed before the work finished
    #[error(transparent)]
    DeadlineExceeded(#[from] DeadlineExceeded),

    /// The work itself failed
    #[error(transparent)]
    Operation(E),
}

impl<E: Error + 'static> ResilienceError<E> {
    /// Wrap an operation error.
    pub const fn operation(error: E) -> Self {
        Self::Operation(error)
    }

    /// Whether the breaker rejected the call.
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Whether the deadline was exceeded.
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded(_))
    }

    /// The operation's own error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::CircuitOpen(_) | Self::DeadlineExceeded(_) => None,
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: Error + ErrorClassification + 'static,
{
    fn error_kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen(err) => err.error_kind(),
            Self::DeadlineExceeded(err) => err.error_kind(),
            Self::Operation(err) => err.error_kind(),
        }
    }
}
