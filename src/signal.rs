//! The signal vocabulary flowing through a pipeline.

use crate::errors::FlowError;

/// One event in a pipeline.
///
/// A subscription delivers any number of `Next` signals followed by exactly
/// one terminal signal (`Complete` or `Error`). Nothing is delivered after
/// the terminal signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    /// A produced value.
    Next(T),
    /// Successful termination. No further signals follow.
    Complete,
    /// Failed termination. No further signals follow.
    Error(FlowError),
}

impl<T> Signal<T> {
    /// Returns true for `Complete` and `Error`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }

    /// Returns true for `Next`.
    #[must_use]
    pub fn is_next(&self) -> bool {
        matches!(self, Signal::Next(_))
    }

    /// Returns the carried value, if this is a `Next` signal.
    pub fn into_value(self) -> Option<T> {
        match self {
            Signal::Next(v) => Some(v),
            _ => None,
        }
    }

    /// Maps the carried value, preserving terminal signals.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Signal<U> {
        match self {
            Signal::Next(v) => Signal::Next(f(v)),
            Signal::Complete => Signal::Complete,
            Signal::Error(e) => Signal::Error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_not_terminal() {
        let sig = Signal::Next(1);
        assert!(sig.is_next());
        assert!(!sig.is_terminal());
    }

    #[test]
    fn test_complete_and_error_are_terminal() {
        assert!(Signal::<i32>::Complete.is_terminal());
        assert!(Signal::<i32>::Error(FlowError::terminal("boom")).is_terminal());
    }

    #[test]
    fn test_map_preserves_terminals() {
        let doubled = Signal::Next(2).map(|v: i32| v * 2);
        assert_eq!(doubled, Signal::Next(4));
        assert_eq!(Signal::<i32>::Complete.map(|v| v), Signal::Complete);
    }

    #[test]
    fn test_into_value() {
        assert_eq!(Signal::Next(7).into_value(), Some(7));
        assert_eq!(Signal::<i32>::Complete.into_value(), None);
    }
}
