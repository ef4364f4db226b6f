//! Test instrumentation for pipeline behavior.
//!
//! The probe records every signal an observed pipeline delivers so tests
//! can assert on values, termination kind, and signal counts without
//! hand-rolling callback bookkeeping.

mod assertions;
mod probe;

pub use assertions::{assert_completed_with, assert_errored_with};
pub use probe::{ProbeObserver, SignalProbe};
