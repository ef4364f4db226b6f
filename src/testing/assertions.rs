use std::fmt;

use crate::errors::FlowError;
use crate::testing::SignalProbe;

/// Asserts the probed pipeline completed with exactly `expected` values.
///
/// # Panics
///
/// Panics when the pipeline errored, has not completed, or delivered
/// different values.
pub fn assert_completed_with<T>(probe: &SignalProbe<T>, expected: &[T])
where
    T: Clone + PartialEq + fmt::Debug,
{
    if let Some(err) = probe.error() {
        panic!("pipeline errored instead of completing: {err}");
    }
    assert!(probe.is_completed(), "pipeline has not completed");
    assert_eq!(probe.values(), expected);
}

/// Asserts the probed pipeline terminated with exactly `expected`.
///
/// # Panics
///
/// Panics when the pipeline completed normally, is still running, or
/// errored with a different error.
pub fn assert_errored_with<T>(probe: &SignalProbe<T>, expected: &FlowError) {
    match probe.error() {
        Some(actual) => assert_eq!(&actual, expected),
        None if probe.is_completed() => panic!("pipeline completed instead of erroring"),
        None => panic!("pipeline has not terminated"),
    }
}
