//! Shared fixtures for unit tests.

use std::fmt;

use bulwark_common::error::ErrorClassification;

use crate::circuit_breaker::CircuitOpenError;
use crate::timeout::DeadlineExceeded;

/// Error with a caller-chosen kind and a tag to tell instances apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TestError {
    pub kind: &'static str,
    pub tag: u32,
}

impl TestError {
    pub(crate) const fn new(kind: &'static str, tag: u32) -> Self {
        Self { kind, tag }
    }

    pub(crate) const fn transient(tag: u32) -> Self {
        Self::new("transient", tag)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind, self.tag)
    }
}

impl std::error::Error for TestError {}

impl ErrorClassification for TestError {
    fn error_kind(&self) -> &'static str {
        self.kind
    }
}

impl From<CircuitOpenError> for TestError {
    fn from(_: CircuitOpenError) -> Self {
        Self::new(CircuitOpenError::KIND, 0)
    }
}

impl From<DeadlineExceeded> for TestError {
    fn from(_: DeadlineExceeded) -> Self {
        Self::new(DeadlineExceeded::KIND, 0)
    }
}
