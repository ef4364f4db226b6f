//! Error taxonomy for pipeline failures.
//!
//! Errors travel through a pipeline as `Signal::Error` payloads. The
//! taxonomy distinguishes failures a retry policy may resubscribe on from
//! failures that should propagate immediately.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure raised by a leaf computation or an intermediate stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowError {
    /// A retry-eligible failure. The message carries the original cause.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that is not retry-eligible.
    #[error("terminal failure: {0}")]
    Terminal(String),

    /// A pipeline completed without producing a value where one was
    /// required. Distinct from an error raised by a computation.
    #[error("no value produced")]
    EmptyResult,
}

impl FlowError {
    /// Creates a transient (retry-eligible) failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a terminal (not retry-eligible) failure.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal(message.into())
    }

    /// Returns true if a retry policy without a filter should consider
    /// resubscribing on this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
