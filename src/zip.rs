//! Multi-upstream synchronization.
//!
//! `zip` subscribes to its inputs in declaration order and emits one
//! combined tuple only when every input has produced exactly one value.
//! An error or an empty completion from any input short-circuits with
//! that outcome. Inputs already running are not cancelled; they run to
//! completion and their results are discarded.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::errors::FlowError;
use crate::signal::Signal;
use crate::single::Single;
use crate::subscriber::{BoxSubscriber, Subscriber};

struct ZipCore<O> {
    down: Mutex<Option<BoxSubscriber<O>>>,
    done: AtomicBool,
}

impl<O: Send> ZipCore<O> {
    fn new(down: BoxSubscriber<O>) -> Self {
        Self {
            down: Mutex::new(Some(down)),
            done: AtomicBool::new(false),
        }
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn take_down(&self) -> Option<BoxSubscriber<O>> {
        if self.done.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.down.lock().take()
    }

    fn emit(&self, value: O) {
        if let Some(mut down) = self.take_down() {
            down.on_signal(Signal::Next(value));
            down.on_signal(Signal::Complete);
        }
    }

    fn complete_empty(&self) {
        if let Some(mut down) = self.take_down() {
            down.on_signal(Signal::Complete);
        }
    }

    fn fail(&self, err: FlowError) {
        if let Some(mut down) = self.take_down() {
            down.on_signal(Signal::Error(err));
        }
    }
}

/// One zip input leg. Results arriving after the zip has short-circuited
/// are discarded, not cancelled.
struct ZipInput<T, O> {
    slot: Arc<Mutex<Option<T>>>,
    core: Arc<ZipCore<O>>,
    try_emit: Arc<dyn Fn() + Send + Sync>,
    saw_value: bool,
    done: bool,
}

impl<T: Send, O: Send> Subscriber<T> for ZipInput<T, O> {
    fn on_signal(&mut self, signal: Signal<T>) {
        if self.done {
            return;
        }
        match signal {
            Signal::Next(value) => {
                self.saw_value = true;
                if self.core.is_done() {
                    return;
                }
                *self.slot.lock() = Some(value);
                (self.try_emit)();
            }
            Signal::Complete => {
                self.done = true;
                if !self.saw_value {
                    // Empty completion short-circuits without a tuple.
                    self.core.complete_empty();
                }
            }
            Signal::Error(err) => {
                self.done = true;
                self.core.fail(err);
            }
        }
    }
}

fn input<T: Send, O: Send>(
    slot: Arc<Mutex<Option<T>>>,
    core: Arc<ZipCore<O>>,
    try_emit: Arc<dyn Fn() + Send + Sync>,
) -> ZipInput<T, O> {
    ZipInput {
        slot,
        core,
        try_emit,
        saw_value: false,
        done: false,
    }
}

/// Combines two single-value pipelines into a pipeline of pairs.
#[must_use]
pub fn zip<A, B>(a: Single<A>, b: Single<B>) -> Single<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Single::from_source(Arc::new(move |down, state| {
        let core = Arc::new(ZipCore::new(down));
        let slot_a = Arc::new(Mutex::new(None::<A>));
        let slot_b = Arc::new(Mutex::new(None::<B>));

        let try_emit: Arc<dyn Fn() + Send + Sync> = {
            let core = Arc::clone(&core);
            let slot_a = Arc::clone(&slot_a);
            let slot_b = Arc::clone(&slot_b);
            Arc::new(move || {
                let pair = {
                    let mut a = slot_a.lock();
                    let mut b = slot_b.lock();
                    if a.is_some() && b.is_some() {
                        a.take().zip(b.take())
                    } else {
                        None
                    }
                };
                if let Some(pair) = pair {
                    core.emit(pair);
                }
            })
        };

        a.subscribe_raw(
            Box::new(input(slot_a, Arc::clone(&core), Arc::clone(&try_emit))),
            state.child(),
        );
        // Later inputs are only subscribed while the zip is still live:
        // a synchronous failure in an earlier input skips them entirely.
        if !core.is_done() && state.is_active() {
            b.subscribe_raw(Box::new(input(slot_b, core, try_emit)), state.child());
        }
    }))
}

/// Combines three single-value pipelines into a pipeline of triples.
#[must_use]
pub fn zip3<A, B, C>(a: Single<A>, b: Single<B>, c: Single<C>) -> Single<(A, B, C)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    Single::from_source(Arc::new(move |down, state| {
        let core = Arc::new(ZipCore::new(down));
        let slot_a = Arc::new(Mutex::new(None::<A>));
        let slot_b = Arc::new(Mutex::new(None::<B>));
        let slot_c = Arc::new(Mutex::new(None::<C>));

        let try_emit: Arc<dyn Fn() + Send + Sync> = {
            let core = Arc::clone(&core);
            let slot_a = Arc::clone(&slot_a);
            let slot_b = Arc::clone(&slot_b);
            let slot_c = Arc::clone(&slot_c);
            Arc::new(move || {
                let triple = {
                    let mut a = slot_a.lock();
                    let mut b = slot_b.lock();
                    let mut c = slot_c.lock();
                    if a.is_some() && b.is_some() && c.is_some() {
                        match (a.take(), b.take(), c.take()) {
                            (Some(x), Some(y), Some(z)) => Some((x, y, z)),
                            _ => None,
                        }
                    } else {
                        None
                    }
                };
                if let Some(triple) = triple {
                    core.emit(triple);
                }
            })
        };

        a.subscribe_raw(
            Box::new(input(slot_a, Arc::clone(&core), Arc::clone(&try_emit))),
            state.child(),
        );
        if !core.is_done() && state.is_active() {
            b.subscribe_raw(
                Box::new(input(slot_b, Arc::clone(&core), Arc::clone(&try_emit))),
                state.child(),
            );
        }
        if !core.is_done() && state.is_active() {
            c.subscribe_raw(Box::new(input(slot_c, core, try_emit)), state.child());
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SignalProbe;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(value: i32, calls: &Arc<AtomicUsize>) -> Single<i32> {
        let calls = Arc::clone(calls);
        Single::from_fn(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    }

    #[test]
    fn test_zip_combines_both_values() {
        let probe = SignalProbe::new();
        zip(Single::just(1), Single::just(2)).subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![(1, 2)]);
        assert!(probe.is_completed());
    }

    #[test]
    fn test_zip3_combines_three_values() {
        let probe = SignalProbe::new();
        zip3(Single::just(1), Single::just(2), Single::just(3))
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![(1, 2, 3)]);
    }

    #[test]
    fn test_zip_error_short_circuits() {
        let probe: SignalProbe<(i32, i32)> = SignalProbe::new();
        zip(
            Single::error(FlowError::transient("boom")),
            Single::just(2),
        )
        .subscribe_observer(probe.observer());
        assert_eq!(probe.error(), Some(FlowError::transient("boom")));
    }

    #[test]
    fn test_zip_first_error_skips_second_subscription() {
        let calls = Arc::new(AtomicUsize::new(0));
        let second = counting(2, &calls);
        let probe: SignalProbe<(i32, i32)> = SignalProbe::new();

        zip(Single::error(FlowError::transient("boom")), second)
            .subscribe_observer(probe.observer());

        assert!(probe.is_errored());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zip_second_error_discards_first_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = counting(1, &calls);
        let probe: SignalProbe<(i32, i32)> = SignalProbe::new();

        zip(first, Single::error(FlowError::transient("boom")))
            .subscribe_observer(probe.observer());

        // The first input already ran to completion; its result is simply
        // discarded.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(probe.is_errored());
    }

    #[test]
    fn test_zip_empty_completion_short_circuits_empty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let second = counting(2, &calls);
        let probe: SignalProbe<((), i32)> = SignalProbe::new();

        zip(Single::just(1).ignore_value(), second).subscribe_observer(probe.observer());

        assert!(probe.values().is_empty());
        assert!(probe.is_completed());
        // The empty input completed first, so the second was never
        // subscribed.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zip_declaration_order_sensitivity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = counting(4, &calls);
        let probe: SignalProbe<(i32, ())> = SignalProbe::new();

        // Reversed order: the value-producing input runs to completion
        // before the empty input short-circuits the zip.
        zip(first, Single::just(3).ignore_value()).subscribe_observer(probe.observer());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(probe.values().is_empty());
        assert!(probe.is_completed());
    }

    #[test]
    fn test_zip_then_flat_map_to_sum() {
        let probe = SignalProbe::new();
        zip3(Single::just(1), Single::just(2), Single::just(3))
            .map(|(a, b, c)| a + b + c)
            .subscribe_observer(probe.observer());
        assert_eq!(probe.values(), vec![6]);
        assert!(probe.is_completed());
    }
}
