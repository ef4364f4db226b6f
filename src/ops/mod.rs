//! Operator nodes: subscriber adapters wrapping a downstream continuation.

pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod transform;
