//! Multi-value pipelines.
//!
//! A [`Many`] may emit any number of `Next` signals before its terminal
//! signal. Like [`Single`](crate::single::Single) it is cold: nothing runs
//! until a subscriber attaches, and every subscription re-executes the
//! source.

use std::fmt;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::ops::context::{publish_on_source, subscribe_on_source};
use crate::ops::error::{
    ContinueSubscriber, DoOnErrorSubscriber, MapErrorSubscriber, ResumeSubscriber,
    ReturnSubscriber,
};
use crate::ops::transform::{
    CollectListSubscriber, DoOnNextSubscriber, FlatMapManySubscriber, MapSubscriber,
};
use crate::parallel::ParallelMany;
use crate::retry::{retry_source, RetryPolicy};
use crate::scheduler::Scheduler;
use crate::signal::Signal;
use crate::single::Single;
use crate::subscriber::{attach, BoxSubscriber, LambdaSubscriber, SourceFn, Subscriber};
use crate::subscription::{ContinueHandler, Subscription, SubscriptionState};

/// A lazy publisher of zero or more values.
pub struct Many<T> {
    pub(crate) source: SourceFn<T>,
}

impl<T> Clone for Many<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl Many<i64> {
    /// Emits `count` consecutive integers starting at `start`.
    #[must_use]
    pub fn range(start: i64, count: u32) -> Self {
        Self::from_source(Arc::new(move |mut down, state| {
            for offset in 0..count {
                if !state.is_active() {
                    return;
                }
                down.on_signal(Signal::Next(start + i64::from(offset)));
            }
            if state.is_active() {
                down.on_signal(Signal::Complete);
            }
        }))
    }
}

impl<T: Send + 'static> Many<T> {
    pub(crate) fn from_source(source: SourceFn<T>) -> Self {
        Self { source }
    }

    pub(crate) fn subscribe_raw(&self, down: BoxSubscriber<T>, state: Arc<SubscriptionState>) {
        (self.source)(down, state);
    }

    /// Emits every item of `items` in order, then completes.
    #[must_use]
    pub fn from_iter<I>(items: I) -> Self
    where
        T: Clone + Sync,
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        Self::from_source(Arc::new(move |mut down, state| {
            for item in &items {
                if !state.is_active() {
                    return;
                }
                down.on_signal(Signal::Next(item.clone()));
            }
            if state.is_active() {
                down.on_signal(Signal::Complete);
            }
        }))
    }

    /// Transforms each value synchronously, preserving order.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Many<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.source;
        let f: Arc<dyn Fn(T) -> U + Send + Sync> = Arc::new(f);
        Many::from_source(Arc::new(move |down, state| {
            source(Box::new(MapSubscriber::new(down, Arc::clone(&f))), state);
        }))
    }

    /// Maps each item to an inner publisher, flattening its signals into
    /// the stream.
    ///
    /// Inner publishers are subscribed in item order. An inner failure
    /// terminates the pipeline unless an error-continue handler is in
    /// scope, in which case the failed item is skipped.
    #[must_use]
    pub fn flat_map<U, F>(self, f: F) -> Many<U>
    where
        T: fmt::Debug,
        U: Send + 'static,
        F: Fn(T) -> Single<U> + Send + Sync + 'static,
    {
        let source = self.source;
        let f: Arc<dyn Fn(T) -> Single<U> + Send + Sync> = Arc::new(f);
        Many::from_source(Arc::new(move |down, state| {
            source(
                Box::new(FlatMapManySubscriber::new(
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

    /// Buffers all values and emits them as one list on completion.
    #[must_use]
    pub fn collect_list(self) -> Single<Vec<T>> {
        let source = self.source;
        Single::from_source(Arc::new(move |down, state| {
            source(Box::new(CollectListSubscriber::new(down)), state);
        }))
    }

    /// On error, continues with the publisher returned by `fallback`.
    /// Items produced before the failure are preserved; items after it are
    /// never produced.
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

    /// On an error matching `predicate`, emits `value` then completes.
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

    /// Survives per-item failures: `handler` runs for each failed item,
    /// which is skipped while the remaining items keep flowing. The only
    /// recovery combinator that does not terminate a multi-value pipeline.
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

    /// Partitions the stream into `rails` concurrent lanes, round-robin.
    #[must_use]
    pub fn parallel(self, rails: usize) -> ParallelMany<T> {
        ParallelMany::partition(self, rails)
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
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing_at(bad: i64) -> impl Fn(i64) -> Single<i64> + Send + Sync {
        move |v| {
            if v == bad {
                Single::error(FlowError::transient(format!("item {v} failed")))
            } else {
                Single::just(v * 10)
            }
        }
    }

    #[test]
    fn test_range_emits_in_order() {
        let probe = SignalProbe::new();
        Many::range(1, 4).subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![1, 2, 3, 4]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_from_iter_round_trip() {
        let probe = SignalProbe::new();
        Many::from_iter(vec!["a", "b"]).subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec!["a", "b"]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_map_preserves_cardinality_and_order() {
        let probe = SignalProbe::new();
        Many::range(1, 3).map(|v| v * 2).subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![2, 4, 6]);
    }

    #[test]
    fn test_flat_map_sequential_order() {
        let probe = SignalProbe::new();
        Many::range(1, 3)
            .flat_map(|v| Single::just(v * 10))
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![10, 20, 30]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_unhandled_item_error_terminates_stream() {
        let produced = Arc::new(AtomicUsize::new(0));
        let produced_clone = Arc::clone(&produced);
        let probe = SignalProbe::new();

        Many::range(1, 6)
            .do_on_next(move |_| {
                produced_clone.fetch_add(1, Ordering::SeqCst);
            })
            .flat_map(failing_at(2))
            .subscribe_observer(probe.observer());

        assert_eq!(probe.values(), vec![10]);
        assert!(probe.is_errored());
        // Items 3..6 are never produced once the failure terminates.
        assert_eq!(produced.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_on_error_continue_skips_failed_item() {
        let skipped = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let skipped_clone = Arc::clone(&skipped);
        let probe = SignalProbe::new();

        Many::from_iter(vec![1i64, 2, 3])
            .flat_map(failing_at(2))
            .on_error_continue(move |_, item| skipped_clone.lock().push(item.to_string()))
            .subscribe_observer(probe.observer());

        assert_eq!(probe.values(), vec![10, 30]);
        assert!(probe.is_completed());
        assert_eq!(*skipped.lock(), vec!["2"]);
    }

    #[test]
    fn test_on_error_continue_yields_n_minus_one_items() {
        let probe = SignalProbe::new();
        Many::range(1, 6)
            .flat_map(failing_at(4))
            .on_error_continue(|_, _| {})
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![10, 20, 30, 50, 60]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_on_error_return_cuts_off_remaining_items() {
        let produced = Arc::new(AtomicUsize::new(0));
        let produced_clone = Arc::clone(&produced);
        let probe = SignalProbe::new();

        Many::range(1, 6)
            .do_on_next(move |_| {
                produced_clone.fetch_add(1, Ordering::SeqCst);
            })
            .flat_map(failing_at(2))
            .on_error_return(|_| true, -1)
            .subscribe_observer(probe.observer());

        assert_eq!(probe.values(), vec![10, -1]);
        assert!(probe.is_completed());
        assert_eq!(produced.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_on_error_resume_cuts_off_remaining_items() {
        let probe = SignalProbe::new();
        Many::range(1, 6)
            .flat_map(failing_at(2))
            .on_error_resume(|_| Single::just(0))
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![10, 0]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_collect_list_gathers_everything() {
        let probe = SignalProbe::new();
        Many::range(1, 3).collect_list().subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![vec![1, 2, 3]]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_collect_list_propagates_error() {
        let probe: SignalProbe<Vec<i64>> = SignalProbe::new();
        Many::range(1, 3)
            .flat_map(failing_at(2))
            .collect_list()
            .subscribe_observer(probe.observer());
        assert!(probe.is_errored());
    }

    #[test]
    fn test_nested_on_error_continue_inside_flat_map() {
        // The inner chain recovers by itself; the outer stream only skips
        // the item because the inner publisher completed empty.
        let probe = SignalProbe::new();
        Many::range(0, 3)
            .flat_map(|v| {
                if v == 1 {
                    Single::error(FlowError::transient("inner"))
                        .on_error_continue(|_, _| {})
                } else {
                    Single::just(v)
                }
            })
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![0, 2]);
        assert!(probe.is_completed());
    }
}
