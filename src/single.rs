//! Single-value pipelines.
//!
//! A [`Single`] is a cold, lazy description of a computation that emits at
//! most one `Next` signal before its terminal signal. Construction never
//! performs work; each subscription re-executes the description from
//! scratch.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::FlowError;
use crate::ops::context::{publish_on_source, subscribe_on_source, DelaySubscriber};
use crate::ops::error::{
    ContinueSubscriber, DoOnErrorSubscriber, MapErrorSubscriber, ResumeSubscriber,
    ReturnSubscriber,
};
use crate::ops::transform::{
    DoOnNextSubscriber, FlatMapSingleSubscriber, IgnoreValueSubscriber, MapSubscriber,
    RequireValueSubscriber, ThenSubscriber,
};
use crate::retry::{retry_source, RetryPolicy};
use crate::scheduler::Scheduler;
use crate::signal::Signal;
use crate::subscriber::{attach, BoxSubscriber, LambdaSubscriber, SourceFn, Subscriber};
use crate::subscription::{ContinueHandler, Subscription, SubscriptionState};

/// A lazy publisher of at most one value.
pub struct Single<T> {
    pub(crate) source: SourceFn<T>,
}

impl<T> Clone for Single<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: Send + 'static> Single<T> {
    pub(crate) fn from_source(source: SourceFn<T>) -> Self {
        Self { source }
    }

    pub(crate) fn subscribe_raw(&self, down: BoxSubscriber<T>, state: Arc<SubscriptionState>) {
        (self.source)(down, state);
    }

    /// A publisher of an already-computed value.
    ///
    /// This is the eager leaf: whatever produced `value` has run by
    /// construction time. Use [`Single::from_fn`] or [`Single::defer`] for
    /// work that must start only at subscription time.
    #[must_use]
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_source(Arc::new(move |mut down, state| {
            if !state.is_active() {
                return;
            }
            down.on_signal(Signal::Next(value.clone()));
            down.on_signal(Signal::Complete);
        }))
    }

    /// A publisher that fails every subscription with `error`.
    #[must_use]
    pub fn error(error: FlowError) -> Self {
        Self::from_source(Arc::new(move |mut down, state| {
            if !state.is_active() {
                return;
            }
            down.on_signal(Signal::Error(error.clone()));
        }))
    }

    /// A publisher that completes without producing a value.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_source(Arc::new(|mut down, state| {
            if !state.is_active() {
                return;
            }
            down.on_signal(Signal::Complete);
        }))
    }

    /// A deferred leaf computation, invoked once per subscription.
    ///
    /// This is where simulated data-store lookups plug in: the closure's
    /// latency and failure mode are opaque to the engine.
    #[must_use]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, FlowError> + Send + Sync + 'static,
    {
        Self::from_source(Arc::new(move |mut down, state| {
            if !state.is_active() {
                return;
            }
            match f() {
                Ok(value) => {
                    down.on_signal(Signal::Next(value));
                    down.on_signal(Signal::Complete);
                }
                Err(err) => down.on_signal(Signal::Error(err)),
            }
        }))
    }

    /// Defers publisher construction itself until subscription time.
    #[must_use]
    pub fn defer<F>(supplier: F) -> Self
    where
        F: Fn() -> Single<T> + Send + Sync + 'static,
    {
        Self::from_source(Arc::new(move |down, state| {
            if !state.is_active() {
                return;
            }
            supplier().subscribe_raw(down, state);
        }))
    }

    /// Transforms the value synchronously.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Single<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.source;
        let f: Arc<dyn Fn(T) -> U + Send + Sync> = Arc::new(f);
        Single::from_source(Arc::new(move |down, state| {
            source(Box::new(MapSubscriber::new(down, Arc::clone(&f))), state);
        }))
    }

    /// Maps the value to an inner publisher and continues with its signals.
    #[must_use]
    pub fn flat_map<U, F>(self, f: F) -> Single<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Single<U> + Send + Sync + 'static,
    {
        let source = self.source;
        let f: Arc<dyn Fn(T) -> Single<U> + Send + Sync> = Arc::new(f);
        Single::from_source(Arc::new(move |down, state| {
            source(
                Box::new(FlatMapSingleSubscriber::new(
                    down,
                    Arc::clone(&f),
                    Arc::clone(&state),
                )),
                state,
            );
        }))
    }

    /// Observes each value without changing the signal flow.
    #[must_use]
    pub fn do_on_next<F>(self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let source = self.source;
        let f: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(f);
        Self::from_source(Arc::new(move |down, state| {
            source(Box::new(DoOnNextSubscriber::new(down, Arc::clone(&f))), state);
        }))
    }

    /// Discards the value and subscribes to `next` after completion.
    #[must_use]
    pub fn then<U: Send + 'static>(self, next: Single<U>) -> Single<U> {
        let source = self.source;
        Single::from_source(Arc::new(move |down, state| {
            source(
                Box::new(ThenSubscriber::new(down, next.clone(), Arc::clone(&state))),
                state,
            );
        }))
    }

    /// Discards the value and completes empty.
    #[must_use]
    pub fn ignore_value(self) -> Single<()> {
        let source = self.source;
        Single::from_source(Arc::new(move |down, state| {
            source(Box::new(IgnoreValueSubscriber::new(down)), state);
        }))
    }

    /// Converts an empty completion into `Error(EmptyResult)`.
    #[must_use]
    pub fn require_value(self) -> Self {
        let source = self.source;
        Self::from_source(Arc::new(move |down, state| {
            source(Box::new(RequireValueSubscriber::new(down)), state);
        }))
    }

    /// Delays the value by `delay` on the timer.
    #[must_use]
    pub fn delay(self, delay: Duration) -> Self {
        let source = self.source;
        Self::from_source(Arc::new(move |down, state| {
            source(
                Box::new(DelaySubscriber::new(down, delay, Arc::clone(&state))),
                state,
            );
        }))
    }

    /// On error, continues with the publisher returned by `fallback`.
    #[must_use]
    pub fn on_error_resume<F>(self, fallback: F) -> Self
    where
        F: Fn(&FlowError) -> Single<T> + Send + Sync + 'static,
    {
        let source = self.source;
        let fallback: Arc<dyn Fn(&FlowError) -> Single<T> + Send + Sync> = Arc::new(fallback);
        Self::from_source(Arc::new(move |down, state| {
            source(
                Box::new(ResumeSubscriber::new(
                    down,
                    Arc::clone(&fallback),
                    Arc::clone(&state),
                )),
                state,
            );
        }))
    }

    /// On an error matching `predicate`, emits `value` and completes.
    /// Non-matching errors propagate unchanged.
    #[must_use]
    pub fn on_error_return<P>(self, predicate: P, value: T) -> Self
    where
        T: Clone + Sync,
        P: Fn(&FlowError) -> bool + Send + Sync + 'static,
    {
        let source = self.source;
        let predicate: Arc<dyn Fn(&FlowError) -> bool + Send + Sync> = Arc::new(predicate);
        Self::from_source(Arc::new(move |down, state| {
            source(
                Box::new(ReturnSubscriber::new(
                    down,
                    Arc::clone(&predicate),
                    value.clone(),
                )),
                state,
            );
        }))
    }

    /// Invokes `handler` on a failure, then completes.
    ///
    /// With only one item, surviving the failure degenerates to an empty
    /// completion. Inside upstream flatMap stages the handler is consulted
    /// per item instead.
    #[must_use]
    pub fn on_error_continue<H>(self, handler: H) -> Self
    where
        H: Fn(&FlowError, &str) + Send + Sync + 'static,
    {
        let source = self.source;
        let handler: ContinueHandler = Arc::new(handler);
        Self::from_source(Arc::new(move |down, state| {
            let scope = state.child_with_handler(Arc::clone(&handler));
            source(
                Box::new(ContinueSubscriber::new(down, Arc::clone(&handler))),
                scope,
            );
        }))
    }

    /// Observes the error, then re-signals it unchanged. Terminates.
    #[must_use]
    pub fn do_on_error<F>(self, f: F) -> Self
    where
        F: Fn(&FlowError) + Send + Sync + 'static,
    {
        let source = self.source;
        let f: Arc<dyn Fn(&FlowError) + Send + Sync> = Arc::new(f);
        Self::from_source(Arc::new(move |down, state| {
            source(Box::new(DoOnErrorSubscriber::new(down, Arc::clone(&f))), state);
        }))
    }

    /// Transforms the error cause. Terminates with the new error.
    #[must_use]
    pub fn on_error_map<F>(self, f: F) -> Self
    where
        F: Fn(FlowError) -> FlowError + Send + Sync + 'static,
    {
        let source = self.source;
        let f: Arc<dyn Fn(FlowError) -> FlowError + Send + Sync> = Arc::new(f);
        Self::from_source(Arc::new(move |down, state| {
            source(Box::new(MapErrorSubscriber::new(down, Arc::clone(&f))), state);
        }))
    }

    /// Resubscribes the original upstream on error, per `policy`.
    #[must_use]
    pub fn retry_when(self, policy: RetryPolicy) -> Self {
        Self::from_source(retry_source(self.source, policy))
    }

    /// Relocates the chain's execution origin onto `scheduler`.
    #[must_use]
    pub fn subscribe_on(self, scheduler: Scheduler) -> Self {
        Self::from_source(subscribe_on_source(self.source, scheduler))
    }

    /// Redispatches signals onto `scheduler` for downstream stages.
    #[must_use]
    pub fn publish_on(self, scheduler: Scheduler) -> Self {
        Self::from_source(publish_on_source(self.source, scheduler))
    }

    /// Subscribes with no callbacks, triggering execution for its side
    /// effects. Errors are surfaced through the log.
    pub fn subscribe(self) -> Subscription {
        self.subscribe_observer(LambdaSubscriber::new())
    }

    /// Subscribes with a value callback.
    pub fn subscribe_next(self, on_next: impl FnMut(T) + Send + 'static) -> Subscription {
        self.subscribe_observer(LambdaSubscriber::new().with_next(on_next))
    }

    /// Subscribes with value, error, and completion callbacks.
    pub fn subscribe_with(
        self,
        on_next: impl FnMut(T) + Send + 'static,
        on_error: impl FnMut(FlowError) + Send + 'static,
        on_complete: impl FnMut() + Send + 'static,
    ) -> Subscription {
        self.subscribe_observer(
            LambdaSubscriber::new()
                .with_next(on_next)
                .with_error(on_error)
                .with_complete(on_complete),
        )
    }

    /// Subscribes a custom observer. This is the sole execution trigger.
    pub fn subscribe_observer(self, observer: impl Subscriber<T> + 'static) -> Subscription {
        attach(&self.source, Box::new(observer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SignalProbe;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_just_emits_value_then_complete() {
        let probe = SignalProbe::new();
        Single::just(5).subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![5]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_construction_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let pipeline = Single::from_fn(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .map(|v| v + 1);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let probe = SignalProbe::new();
        pipeline.subscribe_observer(probe.observer());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.values(), vec![43]);
    }

    #[test]
    fn test_cold_publisher_reexecutes_per_subscription() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let pipeline = Single::from_fn(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        });

        pipeline.clone().subscribe();
        pipeline.subscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flat_map_chains_inner_publisher() {
        let probe = SignalProbe::new();
        Single::just(2)
            .flat_map(|v| Single::just(v * 10))
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![20]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_flat_map_on_empty_never_invokes_mapper() {
        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = Arc::clone(&called);
        let probe = SignalProbe::new();
        Single::just(1)
            .flat_map(|_| Single::<i32>::empty())
            .flat_map(move |v| {
                called_clone.fetch_add(1, Ordering::SeqCst);
                Single::just(v)
            })
            .subscribe_observer(probe.observer());

        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(probe.values().is_empty());
        assert!(probe.is_completed());
    }

    #[test]
    fn test_then_runs_after_parent_completes() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);
        let probe = SignalProbe::new();

        Single::from_fn(move || {
            first.lock().push("first");
            Ok(1)
        })
        .then(Single::defer(move || {
            second.lock().push("second");
            Single::just(2)
        }))
        .subscribe_observer(probe.observer());

        assert_eq!(*order.lock(), vec!["first", "second"]);
        assert_eq!(probe.values(), vec![2]);
    }

    #[test]
    fn test_then_skips_continuation_on_error() {
        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = Arc::clone(&called);
        let probe = SignalProbe::new();

        Single::<i32>::error(FlowError::transient("boom"))
            .then(Single::defer(move || {
                called_clone.fetch_add(1, Ordering::SeqCst);
                Single::just(2)
            }))
            .subscribe_observer(probe.observer());

        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert!(probe.is_errored());
    }

    #[test]
    fn test_ignore_value_completes_empty() {
        let probe = SignalProbe::new();
        Single::just(7).ignore_value().subscribe_observer(probe.observer());
        assert!(probe.values().is_empty());
        assert!(probe.is_completed());
    }

    #[test]
    fn test_require_value_flags_empty_completion() {
        let probe = SignalProbe::new();
        Single::<i32>::empty()
            .require_value()
            .subscribe_observer(probe.observer());
        assert_eq!(probe.error(), Some(FlowError::EmptyResult));
    }

    #[test]
    fn test_single_emits_at_most_one_next() {
        let probe = SignalProbe::new();
        Single::just(1)
            .map(|v| v * 2)
            .flat_map(Single::just)
            .subscribe_observer(probe.observer());
        assert!(probe.next_count() <= 1);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_on_error_return_matching_predicate() {
        let probe = SignalProbe::new();
        Single::<i32>::error(FlowError::transient("lookup failed"))
            .on_error_return(FlowError::is_retryable, -1)
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![-1]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_on_error_return_non_matching_propagates() {
        let probe = SignalProbe::new();
        Single::<i32>::error(FlowError::terminal("bad"))
            .on_error_return(FlowError::is_retryable, -1)
            .subscribe_observer(probe.observer());
        assert_eq!(probe.error(), Some(FlowError::terminal("bad")));
    }

    #[test]
    fn test_on_error_resume_switches_to_fallback() {
        let probe = SignalProbe::new();
        Single::<i32>::error(FlowError::transient("boom"))
            .on_error_resume(|_| Single::just(0))
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![0]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_error_combinator_only_sees_upstream_errors() {
        // The failure is raised downstream of the recovery combinator, so
        // it must not be intercepted.
        let probe = SignalProbe::new();
        Single::just(1)
            .on_error_return(|_| true, -1)
            .flat_map(|_| Single::<i32>::error(FlowError::transient("late")))
            .subscribe_observer(probe.observer());
        assert_eq!(probe.error(), Some(FlowError::transient("late")));
    }

    #[test]
    fn test_do_on_error_observes_and_terminates() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let probe = SignalProbe::new();
        Single::<i32>::error(FlowError::transient("boom"))
            .do_on_error(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe_observer(probe.observer());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(probe.is_errored());
    }

    #[test]
    fn test_on_error_map_transforms_cause() {
        let probe = SignalProbe::new();
        Single::<i32>::error(FlowError::transient("low-level"))
            .on_error_map(|e| FlowError::terminal(format!("wrapped: {e}")))
            .subscribe_observer(probe.observer());
        assert_eq!(
            probe.error(),
            Some(FlowError::terminal("wrapped: transient failure: low-level"))
        );
    }

    #[test]
    fn test_on_error_continue_degenerates_to_empty_completion() {
        let handled = Arc::new(AtomicUsize::new(0));
        let handled_clone = Arc::clone(&handled);
        let probe = SignalProbe::new();
        Single::<i32>::error(FlowError::transient("boom"))
            .on_error_continue(move |_, _| {
                handled_clone.fetch_add(1, Ordering::SeqCst);
            })
            .subscribe_observer(probe.observer());
        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert!(probe.values().is_empty());
        assert!(probe.is_completed());
    }
}
