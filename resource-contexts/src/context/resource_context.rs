//! The resource context and its cleanup algorithm.

use super::{CleanupAction, Close, Managed};
use crate::errors::{BoxError, CompositeCleanupError};
use crate::finalizer::{self, FinalizerJob};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// What caused a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTrigger {
    /// Scope exit, a manual call or a global drain.
    Explicit,
    /// The finalizer worker, after a detached value or a finalizing context
    /// was dropped.
    Finalizer,
}

impl fmt::Display for CleanupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => f.write_str("explicit"),
            Self::Finalizer => f.write_str("finalizer"),
        }
    }
}

/// An ordered collection of pending cleanup actions.
///
/// Handles are cheap to clone and share the same pending list. Actions run
/// in LIFO order when the context is cleaned up; every action is attempted
/// even if a later-registered one failed.
#[derive(Clone)]
pub struct ResourceContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: Uuid,
    /// Registered actions, oldest first.
    actions: Mutex<Vec<CleanupAction>>,
    /// Set once cleanup ownership moved to the finalizer path.
    detached: AtomicBool,
    finalize_on_drop: bool,
}

impl ResourceContext {
    /// Creates an empty context.
    ///
    /// With `needs_finalizer`, actions still pending when the last handle
    /// is dropped are handed to the finalizer worker instead of being
    /// discarded.
    #[must_use]
    pub fn create(needs_finalizer: bool) -> Self {
        Self::from_parts(Uuid::new_v4(), Vec::new(), needs_finalizer)
    }

    /// Creates an empty context without a finalizer.
    #[must_use]
    pub fn new() -> Self {
        Self::create(false)
    }

    /// Creates an empty context with a finalizer.
    #[must_use]
    pub fn with_finalizer() -> Self {
        Self::create(true)
    }

    fn from_parts(id: Uuid, actions: Vec<CleanupAction>, finalize_on_drop: bool) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                actions: Mutex::new(actions),
                detached: AtomicBool::new(false),
                finalize_on_drop,
            }),
        }
    }

    /// Returns the context's unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Appends a cleanup action.
    pub fn register(&self, action: CleanupAction) {
        self.inner.actions.lock().push(action);
    }

    /// Registers a fallible procedure to run at cleanup.
    pub fn defer<F, E>(&self, f: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.register(CleanupAction::new(f));
    }

    /// Registers a labelled fallible procedure to run at cleanup.
    pub fn defer_named<F, E>(&self, label: impl Into<String>, f: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.register(CleanupAction::new(f).named(label));
    }

    /// Takes ownership of `value` and closes it at cleanup.
    pub fn manage<T: Close>(&self, value: T) -> Managed<T> {
        Managed::register(self, value)
    }

    /// Runs all pending actions; see [`ResourceContext::cleanup_with`].
    pub fn cleanup(&self) -> Result<(), CompositeCleanupError> {
        self.cleanup_with(CleanupTrigger::Explicit)
    }

    /// Runs all pending actions, most recently registered first.
    ///
    /// A detached context ignores explicit cleanup; only the finalizer
    /// trigger runs it. Every action is attempted once, and all failures
    /// are returned together. The pending list is empty afterwards, so a
    /// second call is a no-op.
    pub fn cleanup_with(&self, trigger: CleanupTrigger) -> Result<(), CompositeCleanupError> {
        if trigger == CleanupTrigger::Explicit && self.is_detached() {
            debug!(
                context_id = %self.inner.id,
                "Skipping explicit cleanup of detached context"
            );
            return Ok(());
        }

        let mut attempted = 0_usize;
        let mut failures = Vec::new();

        loop {
            // The lock is released before the action runs so actions may
            // register further actions on this context.
            let next = self.inner.actions.lock().pop();
            let Some(action) = next else {
                break;
            };
            attempted += 1;

            if let Err(failure) = action.run() {
                warn!(
                    context_id = %self.inner.id,
                    %trigger,
                    action = %failure.label,
                    error = %failure.source,
                    "Cleanup action failed"
                );
                failures.push(failure);
            }
        }

        if attempted > 0 {
            debug!(
                context_id = %self.inner.id,
                %trigger,
                attempted,
                failed = failures.len(),
                "Resource context cleaned up"
            );
        }

        match CompositeCleanupError::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns the number of pending actions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.actions.lock().len()
    }

    /// Returns true when no actions are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.actions.lock().is_empty()
    }

    /// Returns true once cleanup ownership moved to the finalizer path.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Returns true if pending actions run when the last handle drops.
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.inner.finalize_on_drop
    }

    /// Returns true if both handles refer to the same context.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn mark_detached(&self) {
        self.inner.detached.store(true, Ordering::SeqCst);
    }
}

impl Default for ResourceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContext")
            .field("id", &self.inner.id)
            .field("pending_count", &self.pending_count())
            .field("detached", &self.is_detached())
            .field("finalizer", &self.inner.finalize_on_drop)
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let actions = std::mem::take(self.actions.get_mut());
        if actions.is_empty() {
            return;
        }

        if self.finalize_on_drop {
            debug!(
                context_id = %self.id,
                pending = actions.len(),
                "Resource context dropped; scheduling finalizer cleanup"
            );
            // The orphaned actions move into a fresh handle so the worker can
            // run them with the usual algorithm.
            let orphan = ResourceContext::from_parts(self.id, actions, false);
            finalizer::schedule(FinalizerJob::new(orphan));
        } else {
            warn!(
                context_id = %self.id,
                pending = actions.len(),
                "Resource context dropped with pending cleanup actions; they will not run"
            );
        }
    }
}
