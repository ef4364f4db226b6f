//! Value-transforming operator nodes: map, flatMap, then, and friends.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::signal::Signal;
use crate::single::Single;
use crate::subscriber::{BoxSubscriber, SerializedSubscriber, Subscriber};
use crate::subscription::SubscriptionState;

/// Synchronous value transform. Preserves cardinality and order.
pub(crate) struct MapSubscriber<T, U> {
    down: BoxSubscriber<U>,
    f: Arc<dyn Fn(T) -> U + Send + Sync>,
    done: bool,
}

impl<T, U> MapSubscriber<T, U> {
    pub(crate) fn new(down: BoxSubscriber<U>, f: Arc<dyn Fn(T) -> U + Send + Sync>) -> Self {
        Self {
            down,
            f,
            done: false,
        }
    }
}

impl<T: Send, U: Send> Subscriber<T> for MapSubscriber<T, U> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
        }
        let f = &self.f;
        self.down.on_signal(signal.map(|v| f(v)));
    }
}

/// Side-effect observer for values; signals pass through unchanged.
pub(crate) struct DoOnNextSubscriber<T> {
    down: BoxSubscriber<T>,
    f: Arc<dyn Fn(&T) + Send + Sync>,
    done: bool,
}

impl<T> DoOnNextSubscriber<T> {
    pub(crate) fn new(down: BoxSubscriber<T>, f: Arc<dyn Fn(&T) + Send + Sync>) -> Self {
        Self {
            down,
            f,
            done: false,
        }
    }
}

impl<T: Send> Subscriber<T> for DoOnNextSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
        }
        if let Signal::Next(value) = &signal {
            (self.f)(value);
        }
        self.down.on_signal(signal);
    }
}

/// flatMap for single-value pipelines: the one upstream value selects an
/// inner publisher whose signals replace the outer terminal.
pub(crate) struct FlatMapSingleSubscriber<T, U> {
    down: Option<BoxSubscriber<U>>,
    f: Arc<dyn Fn(T) -> Single<U> + Send + Sync>,
    state: Arc<SubscriptionState>,
    done: bool,
}

impl<T, U> FlatMapSingleSubscriber<T, U> {
    pub(crate) fn new(
        down: BoxSubscriber<U>,
        f: Arc<dyn Fn(T) -> Single<U> + Send + Sync>,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            down: Some(down),
            f,
            state,
            done: false,
        }
    }
}

impl<T: Send + 'static, U: Send + 'static> Subscriber<T> for FlatMapSingleSubscriber<T, U> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                self.done = true;
                if let Some(down) = self.down.take() {
                    let inner = (self.f)(value);
                    inner.subscribe_raw(down, self.state.child());
                }
            }
            Signal::Complete => {
                // Empty upstream: the mapper is never invoked.
                self.done = true;
                if let Some(mut down) = self.down.take() {
                    down.on_signal(Signal::Complete);
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

/// Shared bookkeeping between a flatMap outer subscriber and its inner
/// subscriptions. Completion is deferred until the upstream has completed
/// and no inner publisher is still in flight.
pub(crate) struct FlatMapShared<U> {
    down: SerializedSubscriber<U>,
    pending: AtomicUsize,
    upstream_complete: AtomicBool,
}

impl<U: Send + 'static> FlatMapShared<U> {
    fn new(down: SerializedSubscriber<U>) -> Self {
        Self {
            down,
            pending: AtomicUsize::new(0),
            upstream_complete: AtomicBool::new(false),
        }
    }

    fn inner_finished(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1
            && self.upstream_complete.load(Ordering::SeqCst)
        {
            self.down.signal(Signal::Complete);
        }
    }

    fn upstream_complete(&self) {
        self.upstream_complete.store(true, Ordering::SeqCst);
        if self.pending.load(Ordering::SeqCst) == 0 {
            self.down.signal(Signal::Complete);
        }
    }
}

/// flatMap for multi-value pipelines.
///
/// Items are handed to their inner publisher in subscription order. A
/// failed inner publisher is skipped when an error-continue handler is in
/// scope; otherwise its error terminates the pipeline.
pub(crate) struct FlatMapManySubscriber<T, U> {
    shared: Arc<FlatMapShared<U>>,
    f: Arc<dyn Fn(T) -> Single<U> + Send + Sync>,
    state: Arc<SubscriptionState>,
    done: bool,
}

impl<T, U: Send + 'static> FlatMapManySubscriber<T, U> {
    pub(crate) fn new(
        down: BoxSubscriber<U>,
        f: Arc<dyn Fn(T) -> Single<U> + Send + Sync>,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            shared: Arc::new(FlatMapShared::new(SerializedSubscriber::new(down))),
            f,
            state,
            done: false,
        }
    }
}

impl<T: Send + fmt::Debug, U: Send + 'static> Subscriber<T> for FlatMapManySubscriber<T, U> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                if !self.state.is_active() || self.shared.down.is_done() {
                    return;
                }
                let item = if self.state.has_continue_scope() {
                    format!("{value:?}")
                } else {
                    String::new()
                };
                self.shared.pending.fetch_add(1, Ordering::SeqCst);
                let inner = (self.f)(value);
                let scope = self.state.child();
                inner.subscribe_raw(
                    Box::new(FlatMapInnerSubscriber {
                        shared: Arc::clone(&self.shared),
                        state: scope.clone(),
                        item,
                        done: false,
                    }),
                    scope,
                );
            }
            Signal::Complete => {
                self.done = true;
                self.shared.upstream_complete();
            }
            Signal::Error(err) => {
                self.done = true;
                self.shared.down.signal(Signal::Error(err));
            }
        }
    }
}

struct FlatMapInnerSubscriber<U> {
    shared: Arc<FlatMapShared<U>>,
    state: Arc<SubscriptionState>,
    item: String,
    done: bool,
}

impl<U: Send + 'static> Subscriber<U> for FlatMapInnerSubscriber<U> {
    fn on_signal(&mut self, signal: Signal<U>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                self.shared.down.signal(Signal::Next(value));
            }
            Signal::Complete => {
                self.done = true;
                self.shared.inner_finished();
            }
            Signal::Error(err) => {
                self.done = true;
                if let Some(handler) = self.state.continue_handler() {
                    debug!(item = %self.item, error = %err, "skipping failed item");
                    handler(&err, &self.item);
                    self.shared.inner_finished();
                } else {
                    self.shared.down.signal(Signal::Error(err));
                }
            }
        }
    }
}

/// Sequencing: discard upstream values, subscribe to the continuation
/// publisher once the upstream completes.
pub(crate) struct ThenSubscriber<T, U> {
    down: Option<BoxSubscriber<U>>,
    next: Option<Single<U>>,
    state: Arc<SubscriptionState>,
    done: bool,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, U> ThenSubscriber<T, U> {
    pub(crate) fn new(
        down: BoxSubscriber<U>,
        next: Single<U>,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            down: Some(down),
            next: Some(next),
            state,
            done: false,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Send, U: Send + 'static> Subscriber<T> for ThenSubscriber<T, U> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(_) => {}
            Signal::Complete => {
                self.done = true;
                if let (Some(down), Some(next)) = (self.down.take(), self.next.take()) {
                    next.subscribe_raw(down, self.state.child());
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

/// Discards values and completes empty once the upstream terminates.
pub(crate) struct IgnoreValueSubscriber<T> {
    down: BoxSubscriber<()>,
    done: bool,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> IgnoreValueSubscriber<T> {
    pub(crate) fn new(down: BoxSubscriber<()>) -> Self {
        Self {
            down,
            done: false,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Send> Subscriber<T> for IgnoreValueSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(_) => {}
            Signal::Complete => {
                self.done = true;
                self.down.on_signal(Signal::Complete);
            }
            Signal::Error(err) => {
                self.done = true;
                self.down.on_signal(Signal::Error(err));
            }
        }
    }
}

/// Buffers every value and emits them as one list on completion.
pub(crate) struct CollectListSubscriber<T> {
    down: Option<BoxSubscriber<Vec<T>>>,
    buffer: Vec<T>,
}

impl<T> CollectListSubscriber<T> {
    pub(crate) fn new(down: BoxSubscriber<Vec<T>>) -> Self {
        Self {
            down: Some(down),
            buffer: Vec::new(),
        }
    }
}

impl<T: Send> Subscriber<T> for CollectListSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        match signal {
            Signal::Next(value) => self.buffer.push(value),
            Signal::Complete => {
                if let Some(mut down) = self.down.take() {
                    down.on_signal(Signal::Next(std::mem::take(&mut self.buffer)));
                    down.on_signal(Signal::Complete);
                }
            }
            Signal::Error(err) => {
                if let Some(mut down) = self.down.take() {
                    down.on_signal(Signal::Error(err));
                }
            }
        }
    }
}

/// Converts an empty completion into `Error(EmptyResult)`.
pub(crate) struct RequireValueSubscriber<T> {
    down: BoxSubscriber<T>,
    saw_value: bool,
    done: bool,
}

impl<T> RequireValueSubscriber<T> {
    pub(crate) fn new(down: BoxSubscriber<T>) -> Self {
        Self {
            down,
            saw_value: false,
            done: false,
        }
    }
}

impl<T: Send> Subscriber<T> for RequireValueSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                self.saw_value = true;
                self.down.on_signal(Signal::Next(value));
            }
            Signal::Complete => {
                self.done = true;
                if self.saw_value {
                    self.down.on_signal(Signal::Complete);
                } else {
                    self.down
                        .on_signal(Signal::Error(crate::errors::FlowError::EmptyResult));
                }
            }
            Signal::Error(err) => {
                self.done = true;
                self.down.on_signal(Signal::Error(err));
            }
        }
    }
}
