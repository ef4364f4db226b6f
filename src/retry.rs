//! Bounded resubscription on failure.
//!
//! A retry wraps the original cold upstream description. Each attempt
//! re-executes the upstream's side effects from scratch after a fixed
//! delay on the scheduler timer; the calling thread is never blocked.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::FlowError;
use crate::scheduler;
use crate::signal::Signal;
use crate::subscriber::{SerializedSubscriber, SourceFn, Subscriber};
use crate::subscription::SubscriptionState;

/// Policy governing resubscription: attempt budget, back-off delay, and an
/// optional error filter.
#[derive(Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_attempts: usize,
    /// Delay before each resubscription.
    pub fixed_delay: Duration,
    /// Optional predicate; errors it rejects propagate immediately.
    #[serde(skip)]
    filter: Option<Arc<dyn Fn(&FlowError) -> bool + Send + Sync>>,
}

impl RetryPolicy {
    /// A policy retrying up to `max_attempts` times with a fixed delay.
    #[must_use]
    pub fn fixed_delay(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            fixed_delay: delay,
            filter: None,
        }
    }

    /// Restricts retries to errors accepted by `predicate`.
    #[must_use]
    pub fn with_filter(mut self, predicate: impl Fn(&FlowError) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Returns true if the policy allows retrying on `error`.
    #[must_use]
    pub fn accepts(&self, error: &FlowError) -> bool {
        self.filter.as_ref().map_or(true, |f| f(error))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("fixed_delay", &self.fixed_delay)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Wraps `source` so that errors trigger delayed resubscription per
/// `policy`. The attempt counter is scoped to each top-level subscription.
pub(crate) fn retry_source<T: Send + 'static>(source: SourceFn<T>, policy: RetryPolicy) -> SourceFn<T> {
    Arc::new(move |down, state| {
        let attempts = Arc::new(AtomicUsize::new(0));
        subscribe_attempt(
            Arc::clone(&source),
            policy.clone(),
            SerializedSubscriber::new(down),
            attempts,
            state,
        );
    })
}

fn subscribe_attempt<T: Send + 'static>(
    source: SourceFn<T>,
    policy: RetryPolicy,
    down: SerializedSubscriber<T>,
    attempts: Arc<AtomicUsize>,
    state: Arc<SubscriptionState>,
) {
    let subscriber = RetrySubscriber {
        source: Arc::clone(&source),
        policy,
        down,
        attempts,
        state: Arc::clone(&state),
        done: false,
    };
    source(Box::new(subscriber), state);
}

struct RetrySubscriber<T> {
    source: SourceFn<T>,
    policy: RetryPolicy,
    down: SerializedSubscriber<T>,
    attempts: Arc<AtomicUsize>,
    state: Arc<SubscriptionState>,
    done: bool,
}

impl<T: Send + 'static> Subscriber<T> for RetrySubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Error(err) => {
                self.done = true;
                let used = self.attempts.load(Ordering::SeqCst);
                if used < self.policy.max_attempts && self.policy.accepts(&err) {
                    self.attempts.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        attempt = used + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = self.policy.fixed_delay.as_millis() as u64,
                        error = %err,
                        "scheduling resubscription"
                    );
                    let source = Arc::clone(&self.source);
                    let policy = self.policy.clone();
                    let down = self.down.clone();
                    let attempts = Arc::clone(&self.attempts);
                    let state = Arc::clone(&self.state);
                    scheduler::after(policy.fixed_delay, move || {
                        if state.is_active() {
                            subscribe_attempt(source, policy, down, attempts, state);
                        }
                    });
                } else {
                    self.down.signal(Signal::Error(err));
                }
            }
            other => {
                if other.is_terminal() {
                    self.done = true;
                }
                self.down.signal(other);
            }
        }
    }
}
