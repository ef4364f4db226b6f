//! Subscription lifecycle state.
//!
//! A subscription is the live execution instance created when a subscriber
//! attaches to a publisher. It owns the cancellation flag and the
//! error-continue handler scope consulted by per-item stages. Inner
//! subscriptions (flat-mapped publishers, retry attempts) open child scopes
//! that inherit cancellation and termination from their parents.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::FlowError;

/// Handler invoked by `on_error_continue` scopes for each failed item.
///
/// The second argument is a debug rendering of the failed element, or an
/// empty string when the element is unknown (top-level interception).
pub type ContinueHandler = Arc<dyn Fn(&FlowError, &str) + Send + Sync>;

/// Shared per-subscription state.
pub(crate) struct SubscriptionState {
    id: Uuid,
    cancelled: AtomicBool,
    terminated: AtomicBool,
    parent: Option<Arc<SubscriptionState>>,
    continue_handler: RwLock<Option<ContinueHandler>>,
}

impl SubscriptionState {
    /// Creates the root state for a fresh top-level subscription.
    pub(crate) fn root() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            parent: None,
            continue_handler: RwLock::new(None),
        })
    }

    /// Opens a child scope, inheriting cancellation and termination.
    pub(crate) fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            cancelled: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            parent: Some(Arc::clone(self)),
            continue_handler: RwLock::new(None),
        })
    }

    /// Opens a child scope carrying an error-continue handler visible to
    /// stages subscribed within it.
    pub(crate) fn child_with_handler(self: &Arc<Self>, handler: ContinueHandler) -> Arc<Self> {
        let scope = self.child();
        *scope.continue_handler.write() = Some(handler);
        scope
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// Requests cancellation of this scope and everything below it.
    pub(crate) fn cancel(&self) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            debug!(subscription_id = %self.id, "subscription cancelled");
        }
    }

    /// Marks the scope terminated. Set when a terminal signal has been
    /// delivered to the subscriber, so upstream producers stop emitting.
    pub(crate) fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    /// Returns true if this scope or any ancestor was cancelled.
    pub(crate) fn is_cancelled(&self) -> bool {
        let mut current = Some(self);
        while let Some(state) = current {
            if state.cancelled.load(Ordering::SeqCst) {
                return true;
            }
            current = state.parent.as_deref();
        }
        false
    }

    /// Returns true while signals may still flow in this scope.
    pub(crate) fn is_active(&self) -> bool {
        let mut current = Some(self);
        while let Some(state) = current {
            if state.cancelled.load(Ordering::SeqCst) || state.terminated.load(Ordering::SeqCst) {
                return false;
            }
            current = state.parent.as_deref();
        }
        true
    }

    /// Returns the innermost error-continue handler in scope, if any.
    pub(crate) fn continue_handler(&self) -> Option<ContinueHandler> {
        let mut current = Some(self);
        while let Some(state) = current {
            if let Some(handler) = state.continue_handler.read().as_ref() {
                return Some(Arc::clone(handler));
            }
            current = state.parent.as_deref();
        }
        None
    }

    /// Returns true if any error-continue handler is in scope.
    pub(crate) fn has_continue_scope(&self) -> bool {
        self.continue_handler().is_some()
    }
}

impl std::fmt::Debug for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionState")
            .field("id", &self.id)
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .field("terminated", &self.terminated.load(Ordering::SeqCst))
            .finish()
    }
}

/// Handle to a live subscription, returned by `subscribe`.
///
/// Dropping the handle does not cancel the pipeline; call
/// [`Subscription::cancel`] to stop it.
#[derive(Debug, Clone)]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    pub(crate) fn new(state: Arc<SubscriptionState>) -> Self {
        Self { state }
    }

    /// The unique id of this subscription.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.state.id()
    }

    /// Requests cancellation. Scheduled-but-not-started tasks are skipped;
    /// already-executing side effects run to completion.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}
