//! Execution contexts for pipeline stages.
//!
//! A scheduler names a worker pool plus a delayed-task timer. Pipelines
//! with no explicit assignment execute inline on the subscribing thread.
//! The parallel scheduler is process-wide state: a shared multi-thread
//! runtime initialized lazily on first use and kept for the lifetime of
//! the process.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

static PARALLEL_POOL: OnceLock<Runtime> = OnceLock::new();

#[allow(clippy::expect_used)]
fn parallel_pool() -> &'static Runtime {
    PARALLEL_POOL.get_or_init(|| {
        let workers = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        info!(workers, "initializing shared parallel scheduler pool");
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name_fn(|| {
                static NEXT: AtomicUsize = AtomicUsize::new(0);
                let idx = NEXT.fetch_add(1, Ordering::Relaxed);
                format!("signalflow-worker-{idx}")
            })
            .enable_all()
            .build()
            .expect("failed to build the shared scheduler pool")
    })
}

/// Runs `task` after `delay` on a timer, never by blocking the caller.
///
/// Uses the ambient runtime when there is one, falling back to the shared
/// pool's timer otherwise.
pub(crate) fn after(delay: Duration, task: impl FnOnce() + Send + 'static) {
    let handle = Handle::try_current().unwrap_or_else(|_| parallel_pool().handle().clone());
    handle.spawn(async move {
        tokio::time::sleep(delay).await;
        task();
    });
}

#[derive(Debug)]
enum SchedulerKind {
    /// Executes work inline on the calling thread.
    Immediate,
    /// Dispatches work onto a worker pool.
    Pool { name: String, handle: Handle },
}

/// A named execution context onto which stage processing can be dispatched.
#[derive(Debug, Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerKind>,
}

impl Scheduler {
    /// The default context: work runs inline on the subscribing thread.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            inner: Arc::new(SchedulerKind::Immediate),
        }
    }

    /// The process-wide parallel worker pool.
    #[must_use]
    pub fn parallel() -> Self {
        Self {
            inner: Arc::new(SchedulerKind::Pool {
                name: "parallel".to_string(),
                handle: parallel_pool().handle().clone(),
            }),
        }
    }

    /// A scheduler backed by an existing runtime handle.
    #[must_use]
    pub fn from_handle(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            inner: Arc::new(SchedulerKind::Pool {
                name: name.into(),
                handle,
            }),
        }
    }

    /// The scheduler name, for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self.inner.as_ref() {
            SchedulerKind::Immediate => "immediate",
            SchedulerKind::Pool { name, .. } => name,
        }
    }

    /// Runs a task on this context. Immediate schedulers run it inline.
    pub(crate) fn schedule(&self, task: impl FnOnce() + Send + 'static) {
        match self.inner.as_ref() {
            SchedulerKind::Immediate => task(),
            SchedulerKind::Pool { name, handle } => {
                debug!(scheduler = %name, "dispatching task onto worker pool");
                handle.spawn(async move { task() });
            }
        }
    }

    /// Runs a task on this context after `delay` elapses on the timer.
    ///
    /// Delayed work always runs on a timer thread; the immediate scheduler
    /// borrows the shared pool's timer rather than blocking the caller.
    pub(crate) fn schedule_after(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        match self.inner.as_ref() {
            SchedulerKind::Immediate => after(delay, task),
            SchedulerKind::Pool { handle, .. } => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    task();
                });
            }
        }
    }

    /// Spawns a future onto this context's pool.
    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        match self.inner.as_ref() {
            SchedulerKind::Immediate => {
                let handle =
                    Handle::try_current().unwrap_or_else(|_| parallel_pool().handle().clone());
                handle.spawn(future);
            }
            SchedulerKind::Pool { handle, .. } => {
                handle.spawn(future);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::immediate()
    }
}
