//! Rail-partitioned concurrent execution.
//!
//! `Many::parallel` splits a stream into a fixed number of rails, each
//! backed by its own queue and worker task. Items are demultiplexed
//! round-robin, stage work runs per-rail, and `sequential` merges the
//! rails back into one stream. Merge order across rails is arbitrary;
//! order within a rail is preserved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::FlowError;
use crate::many::Many;
use crate::scheduler::Scheduler;
use crate::signal::Signal;
use crate::single::Single;
use crate::subscriber::{SerializedSubscriber, Subscriber};
use crate::subscription::SubscriptionState;

/// Per-rail downstream: the stage chain applied on each rail feeds one of
/// these, and the final gate merges rails back into a plain subscriber.
trait RailGate<T>: Send + Sync {
    fn next(&self, item: T);
    fn error(&self, err: FlowError);
    fn rail_complete(&self);
}

type LaunchFn<T> = dyn Fn(Scheduler, Arc<dyn RailGate<T>>, Arc<SubscriptionState>) + Send + Sync;

/// A stream split into concurrent rails.
///
/// Like its sequential counterpart this is a lazy description; nothing
/// runs until `sequential` rejoins the rails and the result is subscribed.
pub struct ParallelMany<T> {
    rails: usize,
    scheduler: Scheduler,
    launch: Arc<LaunchFn<T>>,
}

impl<T: Send + 'static> ParallelMany<T> {
    pub(crate) fn partition(upstream: Many<T>, rails: usize) -> Self {
        let rails = rails.max(1);
        let launch: Arc<LaunchFn<T>> = Arc::new(move |scheduler, gate, state| {
            debug!(rails, scheduler = %scheduler.name(), "launching parallel rails");
            let mut txs = Vec::with_capacity(rails);
            for _ in 0..rails {
                let (tx, mut rx) = mpsc::unbounded_channel::<T>();
                txs.push(tx);
                let gate = Arc::clone(&gate);
                let rail_state = Arc::clone(&state);
                scheduler.spawn(async move {
                    while let Some(item) = rx.recv().await {
                        if rail_state.is_cancelled() {
                            break;
                        }
                        gate.next(item);
                    }
                    gate.rail_complete();
                });
            }
            upstream.subscribe_raw(
                Box::new(DemuxSubscriber {
                    txs,
                    next_rail: 0,
                    gate,
                    done: false,
                }),
                state,
            );
        });
        Self {
            rails,
            scheduler: Scheduler::parallel(),
            launch,
        }
    }

    /// Transforms every item, on its rail's worker.
    #[must_use]
    pub fn map<U: Send + 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> ParallelMany<U> {
        let launch = self.launch;
        let f: Arc<dyn Fn(T) -> U + Send + Sync> = Arc::new(f);
        ParallelMany {
            rails: self.rails,
            scheduler: self.scheduler,
            launch: Arc::new(move |scheduler, gate, state| {
                let adapted: Arc<dyn RailGate<T>> = Arc::new(MapGate {
                    f: Arc::clone(&f),
                    down: gate,
                });
                (launch)(scheduler, adapted, state);
            }),
        }
    }

    /// Observes every item on its rail without changing it.
    #[must_use]
    pub fn do_on_next(self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        let launch = self.launch;
        let f: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(f);
        Self {
            rails: self.rails,
            scheduler: self.scheduler,
            launch: Arc::new(move |scheduler, gate, state| {
                let adapted: Arc<dyn RailGate<T>> = Arc::new(DoOnNextGate {
                    f: Arc::clone(&f),
                    down: gate,
                });
                (launch)(scheduler, adapted, state);
            }),
        }
    }

    /// Expands every item through a nested pipeline, executed on the
    /// item's rail. An inner error fails the whole merged stream.
    #[must_use]
    pub fn flat_map<U: Send + 'static>(
        self,
        f: impl Fn(T) -> Single<U> + Send + Sync + 'static,
    ) -> ParallelMany<U> {
        let launch = self.launch;
        let f: Arc<dyn Fn(T) -> Single<U> + Send + Sync> = Arc::new(f);
        ParallelMany {
            rails: self.rails,
            scheduler: self.scheduler,
            launch: Arc::new(move |scheduler, gate, state| {
                let adapted: Arc<dyn RailGate<T>> = Arc::new(FlatMapGate {
                    f: Arc::clone(&f),
                    down: gate,
                    state: Arc::clone(&state),
                });
                (launch)(scheduler, adapted, state);
            }),
        }
    }

    /// Assigns the scheduler whose pool runs the rail workers.
    #[must_use]
    pub fn run_on(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Merges the rails back into a single stream.
    ///
    /// The merged stream completes once every rail has drained; the first
    /// rail error terminates it and later rail output is discarded.
    #[must_use]
    pub fn sequential(self) -> Many<T> {
        let rails = self.rails;
        let scheduler = self.scheduler;
        let launch = self.launch;
        Many::from_source(Arc::new(move |down, state| {
            let gate: Arc<dyn RailGate<T>> = Arc::new(MergeGate {
                down: SerializedSubscriber::new(down),
                remaining: AtomicUsize::new(rails),
            });
            (launch)(scheduler.clone(), gate, state);
        }))
    }
}

/// Round-robin demultiplexer feeding the rail queues.
struct DemuxSubscriber<T> {
    txs: Vec<mpsc::UnboundedSender<T>>,
    next_rail: usize,
    gate: Arc<dyn RailGate<T>>,
    done: bool,
}

impl<T: Send> Subscriber<T> for DemuxSubscriber<T> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(item) => {
                // Receiver gone means that rail's worker already stopped.
                let _ = self.txs[self.next_rail].send(item);
                self.next_rail = (self.next_rail + 1) % self.txs.len();
            }
            Signal::Complete => {
                self.done = true;
                // Dropping the senders lets each worker drain its queue
                // and report rail completion.
                self.txs.clear();
            }
            Signal::Error(err) => {
                self.done = true;
                self.txs.clear();
                self.gate.error(err);
            }
        }
    }
}

struct MergeGate<T> {
    down: SerializedSubscriber<T>,
    remaining: AtomicUsize,
}

impl<T: Send + 'static> RailGate<T> for MergeGate<T> {
    fn next(&self, item: T) {
        self.down.signal(Signal::Next(item));
    }

    fn error(&self, err: FlowError) {
        self.down.signal(Signal::Error(err));
    }

    fn rail_complete(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.down.signal(Signal::Complete);
        }
    }
}

struct MapGate<T, U> {
    f: Arc<dyn Fn(T) -> U + Send + Sync>,
    down: Arc<dyn RailGate<U>>,
}

impl<T: Send, U: Send> RailGate<T> for MapGate<T, U> {
    fn next(&self, item: T) {
        self.down.next((self.f)(item));
    }

    fn error(&self, err: FlowError) {
        self.down.error(err);
    }

    fn rail_complete(&self) {
        self.down.rail_complete();
    }
}

struct DoOnNextGate<T> {
    f: Arc<dyn Fn(&T) + Send + Sync>,
    down: Arc<dyn RailGate<T>>,
}

impl<T: Send> RailGate<T> for DoOnNextGate<T> {
    fn next(&self, item: T) {
        (self.f)(&item);
        self.down.next(item);
    }

    fn error(&self, err: FlowError) {
        self.down.error(err);
    }

    fn rail_complete(&self) {
        self.down.rail_complete();
    }
}

struct FlatMapGate<T, U> {
    f: Arc<dyn Fn(T) -> Single<U> + Send + Sync>,
    down: Arc<dyn RailGate<U>>,
    state: Arc<SubscriptionState>,
}

impl<T: Send, U: Send + 'static> RailGate<T> for FlatMapGate<T, U> {
    fn next(&self, item: T) {
        let inner = (self.f)(item);
        inner.subscribe_raw(
            Box::new(InnerToGate {
                down: Arc::clone(&self.down),
                done: false,
            }),
            self.state.child(),
        );
    }

    fn error(&self, err: FlowError) {
        self.down.error(err);
    }

    fn rail_complete(&self) {
        self.down.rail_complete();
    }
}

/// Feeds a nested pipeline's output back into the rail, swallowing the
/// inner completion signal.
struct InnerToGate<U> {
    down: Arc<dyn RailGate<U>>,
    done: bool,
}

impl<U: Send> Subscriber<U> for InnerToGate<U> {
    fn on_signal(&mut self, signal: Signal<U>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => self.down.next(value),
            Signal::Complete => self.done = true,
            Signal::Error(err) => {
                self.done = true;
                self.down.error(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SignalProbe;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::time::Duration;

    #[tokio::test]
    async fn test_parallel_round_trip_preserves_items() {
        let probe = SignalProbe::new();
        Many::range(1, 6)
            .parallel(3)
            .map(|v| v * 10)
            .run_on(Scheduler::parallel())
            .sequential()
            .subscribe_observer(probe.observer());

        probe.await_terminal(Duration::from_secs(5)).await;
        let mut values = probe.values();
        values.sort_unstable();
        assert_eq!(values, vec![10, 20, 30, 40, 50, 60]);
        assert!(probe.is_completed());
    }

    #[tokio::test]
    async fn test_parallel_rails_run_on_pool_threads() {
        let threads = Arc::new(Mutex::new(HashSet::new()));
        let threads_clone = Arc::clone(&threads);
        let probe = SignalProbe::new();

        Many::range(1, 8)
            .parallel(4)
            .do_on_next(move |_| {
                let name = std::thread::current()
                    .name()
                    .unwrap_or_default()
                    .to_string();
                threads_clone.lock().insert(name);
            })
            .sequential()
            .subscribe_observer(probe.observer());

        probe.await_terminal(Duration::from_secs(5)).await;
        assert!(probe.is_completed());
        let threads = threads.lock();
        assert!(!threads.is_empty());
        for name in threads.iter() {
            assert!(name.starts_with("signalflow-worker"), "ran on {name}");
        }
    }

    #[tokio::test]
    async fn test_parallel_flat_map_expands_items() {
        let probe = SignalProbe::new();
        Many::from_iter(vec![1, 2, 3])
            .parallel(2)
            .flat_map(|v| Single::just(v + 100))
            .sequential()
            .subscribe_observer(probe.observer());

        probe.await_terminal(Duration::from_secs(5)).await;
        let mut values = probe.values();
        values.sort_unstable();
        assert_eq!(values, vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_parallel_inner_error_fails_merged_stream() {
        let probe: SignalProbe<i32> = SignalProbe::new();
        Many::from_iter(vec![1, 2, 3])
            .parallel(2)
            .flat_map(|v| {
                if v == 2 {
                    Single::error(FlowError::terminal("rail failure"))
                } else {
                    Single::just(v)
                }
            })
            .sequential()
            .subscribe_observer(probe.observer());

        probe.await_terminal(Duration::from_secs(5)).await;
        assert_eq!(probe.error(), Some(FlowError::terminal("rail failure")));
    }

    #[tokio::test]
    async fn test_zero_rails_clamps_to_one() {
        let probe = SignalProbe::new();
        Many::range(1, 3)
            .parallel(0)
            .map(|v| v + 1)
            .sequential()
            .subscribe_observer(probe.observer());

        probe.await_terminal(Duration::from_secs(5)).await;
        // A single rail preserves input order end to end.
        assert_eq!(probe.values(), vec![2, 3, 4]);
    }
}
