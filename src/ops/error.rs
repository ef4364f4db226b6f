//! The five error-recovery operator nodes.
//!
//! Each intercepts only errors raised upstream of its position. Resume and
//! return convert the error into a substitute success outcome; doOnError
//! and onErrorMap re-signal an error; onErrorContinue survives per-item
//! failures without terminating a multi-value pipeline.

use std::sync::Arc;
use tracing::debug;

use crate::errors::FlowError;
use crate::signal::Signal;
use crate::single::Single;
use crate::subscriber::{BoxSubscriber, Subscriber};
use crate::subscription::{ContinueHandler, SubscriptionState};

/// onErrorResume: discard the error and continue with a fallback publisher.
pub(crate) struct ResumeSubscriber<T> {
    down: Option<BoxSubscriber<T>>,
    fallback: Arc<dyn Fn(&FlowError) -> Single<T> + Send + Sync>,
    state: Arc<SubscriptionState>,
    done: bool,
}

impl<T> ResumeSubscriber<T> {
    pub(crate) fn new(
        down: BoxSubscriber<T>,
        fallback: Arc<dyn Fn(&FlowError) -> Single<T> + Send + Sync>,
        state: Arc<SubscriptionState>,
    ) -> Self {
        Self {
            down: Some(down),
            fallback,
            state,
            done: false,
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for ResumeSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                if let Some(down) = self.down.as_mut() {
                    down.on_signal(Signal::Next(value));
                }
            }
            Signal::Complete => {
                self.done = true;
                if let Some(mut down) = self.down.take() {
                    down.on_signal(Signal::Complete);
                }
            }
            Signal::Error(err) => {
                self.done = true;
                if let Some(down) = self.down.take() {
                    debug!(error = %err, "resuming with fallback publisher");
                    let fallback = (self.fallback)(&err);
                    fallback.subscribe_raw(down, self.state.child());
                }
            }
        }
    }
}

/// onErrorReturn: emit a literal value for matching errors, then complete.
pub(crate) struct ReturnSubscriber<T> {
    down: BoxSubscriber<T>,
    predicate: Arc<dyn Fn(&FlowError) -> bool + Send + Sync>,
    value: T,
    done: bool,
}

impl<T: Clone> ReturnSubscriber<T> {
    pub(crate) fn new(
        down: BoxSubscriber<T>,
        predicate: Arc<dyn Fn(&FlowError) -> bool + Send + Sync>,
        value: T,
    ) -> Self {
        Self {
            down,
            predicate,
            value,
            done: false,
        }
    }
}

impl<T: Clone + Send> Subscriber<T> for ReturnSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
        }
        match signal {
            Signal::Error(err) if (self.predicate)(&err) => {
                self.down.on_signal(Signal::Next(self.value.clone()));
                self.down.on_signal(Signal::Complete);
            }
            other => self.down.on_signal(other),
        }
    }
}

/// doOnError: observe the error, then re-signal it unchanged.
pub(crate) struct DoOnErrorSubscriber<T> {
    down: BoxSubscriber<T>,
    f: Arc<dyn Fn(&FlowError) + Send + Sync>,
    done: bool,
}

impl<T> DoOnErrorSubscriber<T> {
    pub(crate) fn new(down: BoxSubscriber<T>, f: Arc<dyn Fn(&FlowError) + Send + Sync>) -> Self {
        Self {
            down,
            f,
            done: false,
        }
    }
}

impl<T: Send> Subscriber<T> for DoOnErrorSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
        }
        if let Signal::Error(err) = &signal {
            (self.f)(err);
        }
        self.down.on_signal(signal);
    }
}

/// onErrorMap: transform the error cause, re-signal the new error.
pub(crate) struct MapErrorSubscriber<T> {
    down: BoxSubscriber<T>,
    f: Arc<dyn Fn(FlowError) -> FlowError + Send + Sync>,
    done: bool,
}

impl<T> MapErrorSubscriber<T> {
    pub(crate) fn new(
        down: BoxSubscriber<T>,
        f: Arc<dyn Fn(FlowError) -> FlowError + Send + Sync>,
    ) -> Self {
        Self {
            down,
            f,
            done: false,
        }
    }
}

impl<T: Send> Subscriber<T> for MapErrorSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
        }
        match signal {
            Signal::Error(err) => self.down.on_signal(Signal::Error((self.f)(err))),
            other => self.down.on_signal(other),
        }
    }
}

/// onErrorContinue: top-level interception.
///
/// Per-item failures inside upstream flatMap stages never reach this node;
/// they are handled through the scope installed at subscription time. An
/// error that does arrive here has no failed item to skip, so the handler
/// runs and the pipeline completes.
pub(crate) struct ContinueSubscriber<T> {
    down: BoxSubscriber<T>,
    handler: ContinueHandler,
    done: bool,
}

impl<T> ContinueSubscriber<T> {
    pub(crate) fn new(down: BoxSubscriber<T>, handler: ContinueHandler) -> Self {
        Self {
            down,
            handler,
            done: false,
        }
    }
}

impl<T: Send> Subscriber<T> for ContinueSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        if signal.is_terminal() {
            self.done = true;
        }
        match signal {
            Signal::Error(err) => {
                (self.handler)(&err, "");
                self.down.on_signal(Signal::Complete);
            }
            other => self.down.on_signal(other),
        }
    }
}
