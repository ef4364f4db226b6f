use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::errors::FlowError;
use crate::signal::Signal;
use crate::subscriber::Subscriber;

struct ProbeInner<T> {
    signals: Mutex<Vec<Signal<T>>>,
    done: AtomicBool,
    notify: Notify,
}

/// Records every signal delivered to it, for assertions.
///
/// `observer()` hands out the subscriber half; the probe half stays with
/// the test. Works for synchronous pipelines directly and for scheduled
/// pipelines via `await_terminal`.
pub struct SignalProbe<T> {
    inner: Arc<ProbeInner<T>>,
}

impl<T> Clone for SignalProbe<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SignalProbe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SignalProbe<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                signals: Mutex::new(Vec::new()),
                done: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// The subscriber half, to hand to the pipeline under test.
    #[must_use]
    pub fn observer(&self) -> ProbeObserver<T> {
        ProbeObserver {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of `Next` signals recorded so far.
    #[must_use]
    pub fn next_count(&self) -> usize {
        self.inner
            .signals
            .lock()
            .iter()
            .filter(|s| s.is_next())
            .count()
    }

    /// True once a `Complete` signal was recorded.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner
            .signals
            .lock()
            .iter()
            .any(|s| matches!(s, Signal::Complete))
    }

    /// True once an `Error` signal was recorded.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.error().is_some()
    }

    /// The recorded error, if the pipeline terminated with one.
    #[must_use]
    pub fn error(&self) -> Option<FlowError> {
        self.inner.signals.lock().iter().find_map(|s| match s {
            Signal::Error(err) => Some(err.clone()),
            _ => None,
        })
    }

    /// Waits for a terminal signal, up to `timeout`. Returns without
    /// panicking on timeout; the caller's assertions report the state.
    pub async fn await_terminal(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.done.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.inner.done.load(Ordering::SeqCst) {
                return;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return;
            }
        }
    }
}

impl<T: Clone> SignalProbe<T> {
    /// Every signal recorded so far, in delivery order.
    #[must_use]
    pub fn signals(&self) -> Vec<Signal<T>> {
        self.inner.signals.lock().clone()
    }

    /// The `Next` payloads recorded so far, in delivery order.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.inner
            .signals
            .lock()
            .iter()
            .filter_map(|s| match s {
                Signal::Next(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }
}

/// The subscriber half of a [`SignalProbe`].
pub struct ProbeObserver<T> {
    inner: Arc<ProbeInner<T>>,
}

impl<T: Send> Subscriber<T> for ProbeObserver<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        let terminal = signal.is_terminal();
        self.inner.signals.lock().push(signal);
        if terminal {
            self.inner.done.store(true, Ordering::SeqCst);
            self.inner.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_probe_records_in_order() {
        let probe = SignalProbe::new();
        let mut observer = probe.observer();
        observer.on_signal(Signal::Next(1));
        observer.on_signal(Signal::Next(2));
        observer.on_signal(Signal::Complete);

        assert_eq!(probe.values(), vec![1, 2]);
        assert_eq!(probe.next_count(), 2);
        assert!(probe.is_completed());
        assert!(!probe.is_errored());
    }

    #[test]
    fn test_observer_type_is_nameable_by_callers() {
        let probe = SignalProbe::new();
        let mut observer: crate::testing::ProbeObserver<i32> = probe.observer();
        observer.on_signal(Signal::Next(1));
        assert_eq!(probe.next_count(), 1);
    }

    #[test]
    fn test_probe_captures_error() {
        let probe: SignalProbe<i32> = SignalProbe::new();
        let mut observer = probe.observer();
        observer.on_signal(Signal::Error(FlowError::transient("boom")));

        assert_eq!(probe.error(), Some(FlowError::transient("boom")));
    }

    #[tokio::test]
    async fn test_await_terminal_returns_after_complete() {
        let probe: SignalProbe<i32> = SignalProbe::new();
        let mut observer = probe.observer();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            observer.on_signal(Signal::Complete);
        });

        probe.await_terminal(Duration::from_secs(5)).await;
        assert!(probe.is_completed());
    }

    #[tokio::test]
    async fn test_await_terminal_times_out_quietly() {
        let probe: SignalProbe<i32> = SignalProbe::new();
        probe.await_terminal(Duration::from_millis(20)).await;
        assert!(!probe.is_completed());
    }
}
