//! The subscriber contract and shared subscriber plumbing.
//!
//! Every operator in a chain implements one uniform "process one signal"
//! contract and holds its downstream continuation, invoking it either
//! synchronously or through a scheduler dispatch. The helpers here enforce
//! the terminal-signal invariants at the edges where multiple producers
//! fan into one consumer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

use crate::errors::FlowError;
use crate::signal::Signal;
use crate::subscription::{Subscription, SubscriptionState};

/// Consumer of pipeline signals.
///
/// Implementations must tolerate being invoked from whichever execution
/// context the upstream stage runs on.
pub trait Subscriber<T>: Send {
    /// Processes one signal.
    fn on_signal(&mut self, signal: Signal<T>);
}

/// Boxed subscriber, the form operators pass downstream.
pub type BoxSubscriber<T> = Box<dyn Subscriber<T>>;

/// A cold source: invoked once per subscription with the downstream
/// subscriber and the subscription scope in force.
pub(crate) type SourceFn<T> = Arc<dyn Fn(BoxSubscriber<T>, Arc<SubscriptionState>) + Send + Sync>;

/// Subscriber assembled from optional callbacks.
///
/// An `Error` signal with no error callback registered is a defect in the
/// calling code; it is surfaced through the log, never swallowed.
pub struct LambdaSubscriber<T> {
    on_next: Option<Box<dyn FnMut(T) + Send>>,
    on_error: Option<Box<dyn FnMut(FlowError) + Send>>,
    on_complete: Option<Box<dyn FnMut() + Send>>,
    done: bool,
}

impl<T> LambdaSubscriber<T> {
    /// Creates a subscriber with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_next: None,
            on_error: None,
            on_complete: None,
            done: false,
        }
    }

    /// Sets the value callback.
    #[must_use]
    pub fn with_next(mut self, f: impl FnMut(T) + Send + 'static) -> Self {
        self.on_next = Some(Box::new(f));
        self
    }

    /// Sets the error callback.
    #[must_use]
    pub fn with_error(mut self, f: impl FnMut(FlowError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Sets the completion callback.
    #[must_use]
    pub fn with_complete(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl<T> Default for LambdaSubscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Subscriber<T> for LambdaSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                if let Some(f) = self.on_next.as_mut() {
                    f(value);
                }
            }
            Signal::Complete => {
                self.done = true;
                if let Some(f) = self.on_complete.as_mut() {
                    f();
                }
            }
            Signal::Error(err) => {
                self.done = true;
                match self.on_error.as_mut() {
                    Some(f) => f(err),
                    None => {
                        error!(error = %err, "unhandled pipeline error reached the subscriber");
                    }
                }
            }
        }
    }
}

struct SerializedInner<T> {
    down: Mutex<BoxSubscriber<T>>,
    done: AtomicBool,
}

/// Thread-safe subscriber wrapper used at every fan-in point.
///
/// Serializes signal delivery and guarantees at most one terminal signal,
/// dropping anything that arrives after it.
pub(crate) struct SerializedSubscriber<T> {
    inner: Arc<SerializedInner<T>>,
}

impl<T> Clone for SerializedSubscriber<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> SerializedSubscriber<T> {
    pub(crate) fn new(down: BoxSubscriber<T>) -> Self {
        Self {
            inner: Arc::new(SerializedInner {
                down: Mutex::new(down),
                done: AtomicBool::new(false),
            }),
        }
    }

    /// Delivers one signal, enforcing the terminal-once invariant.
    pub(crate) fn signal(&self, signal: Signal<T>) {
        let mut down = self.inner.down.lock();
        if self.inner.done.load(Ordering::SeqCst) {
            return;
        }
        if signal.is_terminal() {
            self.inner.done.store(true, Ordering::SeqCst);
        }
        down.on_signal(signal);
    }

    /// Returns true once a terminal signal has been delivered.
    pub(crate) fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }
}

impl<T: Send + 'static> Subscriber<T> for SerializedSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        self.signal(signal);
    }
}

/// Outermost subscriber wrapper attached by `subscribe`.
///
/// Marks the subscription scope terminated once the terminal signal has
/// been delivered, which stops upstream producers, and silences delivery
/// after cancellation.
struct TerminalTracker<T> {
    down: BoxSubscriber<T>,
    state: Arc<SubscriptionState>,
    done: bool,
}

impl<T: Send> Subscriber<T> for TerminalTracker<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done || self.state.is_cancelled() {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
            self.state.terminate();
        }
        self.down.on_signal(signal);
    }
}

/// Subscribes `observer` to `source` under a fresh root scope.
pub(crate) fn attach<T: Send + 'static>(
    source: &SourceFn<T>,
    observer: BoxSubscriber<T>,
) -> Subscription {
    let state = SubscriptionState::root();
    let tracker = TerminalTracker {
        down: observer,
        state: Arc::clone(&state),
        done: false,
    };
    source(Box::new(tracker), Arc::clone(&state));
    Subscription::new(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambda_subscriber_dispatches_callbacks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_next = Arc::clone(&seen);
        let seen_complete = Arc::clone(&seen);
        let mut sub = LambdaSubscriber::new()
            .with_next(move |v: i32| seen_next.lock().push(format!("next:{v}")))
            .with_complete(move || seen_complete.lock().push("complete".to_string()));

        sub.on_signal(Signal::Next(1));
        sub.on_signal(Signal::Complete);
        assert_eq!(*seen.lock(), vec!["next:1", "complete"]);
    }

    #[test]
    fn test_lambda_subscriber_stops_after_terminal() {
        let count = Arc::new(Mutex::new(0));
        let count_clone = Arc::clone(&count);
        let mut sub = LambdaSubscriber::new().with_next(move |_: i32| *count_clone.lock() += 1);

        sub.on_signal(Signal::Complete);
        sub.on_signal(Signal::Next(1));
        assert_eq!(*count.lock(), 0);
    }

    #[test]
    fn test_serialized_subscriber_single_terminal() {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let signals_clone = Arc::clone(&signals);
        let recorder = LambdaSubscriber::new()
            .with_next(move |v: i32| signals_clone.lock().push(Signal::Next(v)));
        let serialized = SerializedSubscriber::new(Box::new(recorder));

        serialized.signal(Signal::Next(1));
        serialized.signal(Signal::Complete);
        serialized.signal(Signal::Next(2));
        serialized.signal(Signal::Error(FlowError::terminal("late")));

        assert!(serialized.is_done());
        assert_eq!(*signals.lock(), vec![Signal::Next(1)]);
    }
}
