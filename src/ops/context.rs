//! Scheduler-crossing operator nodes: subscribeOn, publishOn, delay.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

use crate::scheduler::{self, Scheduler};
use crate::signal::Signal;
use crate::subscriber::{BoxSubscriber, SourceFn, Subscriber};
use crate::subscription::SubscriptionState;

/// Relocates the subscription point onto `scheduler`.
///
/// Because signal delivery is synchronous until the next context boundary,
/// this moves the whole chain's execution origin, regardless of where in
/// the chain the operator was declared.
pub(crate) fn subscribe_on_source<T: Send + 'static>(
    source: SourceFn<T>,
    scheduler: Scheduler,
) -> SourceFn<T> {
    Arc::new(move |down, state| {
        let source = Arc::clone(&source);
        trace!(scheduler = %scheduler.name(), "relocating subscription point");
        scheduler.schedule(move || {
            if state.is_active() {
                source(down, Arc::clone(&state));
            }
        });
    })
}

/// Redispatches signals crossing this point onto `scheduler`.
///
/// Upstream stages keep their prior execution context; every stage
/// declared after this operator processes signals on the scheduler's pool.
pub(crate) fn publish_on_source<T: Send + 'static>(
    source: SourceFn<T>,
    scheduler: Scheduler,
) -> SourceFn<T> {
    Arc::new(move |mut down, state| {
        let (tx, mut rx) = mpsc::unbounded_channel::<Signal<T>>();
        let relay_state = Arc::clone(&state);
        scheduler.spawn(async move {
            while let Some(signal) = rx.recv().await {
                if relay_state.is_cancelled() {
                    break;
                }
                let terminal = signal.is_terminal();
                down.on_signal(signal);
                if terminal {
                    break;
                }
            }
        });
        source(Box::new(ChannelSubscriber { tx, done: false }), state);
    })
}

/// Upstream-facing half of a publishOn boundary: forwards signals into the
/// relay channel.
struct ChannelSubscriber<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
    done: bool,
}

impl<T: Send> Subscriber<T> for ChannelSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
        }
        // Receiver gone means the downstream already terminated.
        let _ = self.tx.send(signal);
    }
}

/// Delays the single upstream value on the timer, never by blocking.
pub(crate) struct DelaySubscriber<T> {
    down: Option<BoxSubscriber<T>>,
    held: Option<T>,
    delay: Duration,
    state: Arc<SubscriptionState>,
    done: bool,
}

impl<T> DelaySubscriber<T> {
    pub(crate) fn new(
        down: BoxSubscriber<T>,
        delay: Duration,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            down: Some(down),
            held: None,
            delay,
            state,
            done: false,
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for DelaySubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                self.held = Some(value);
            }
            Signal::Complete => {
                self.done = true;
                match (self.down.take(), self.held.take()) {
                    (Some(mut down), Some(value)) => {
                        let state = Arc::clone(&self.state);
                        scheduler::after(self.delay, move || {
                            if state.is_active() {
                                down.on_signal(Signal::Next(value));
                                down.on_signal(Signal::Complete);
                            }
                        });
                    }
                    (Some(mut down), None) => down.on_signal(Signal::Complete),
                    _ => {}
                }
            }
            Signal::Error(err) => {
                self.done = true;
                if let Some(mut down) = self.down.take() {
                    down.on_signal(Signal::Error(err));
                }
            }
        }
    }
}
