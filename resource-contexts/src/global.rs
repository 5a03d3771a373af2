//! The process-wide fallback context.
//!
//! Resources acquired through the implicit call style outside any scope
//! land here. The context has no finalizer; it is drained manually with
//! [`drain_global`] or at the end of `main` by the guard returned from
//! [`install`]:
//!
//! ```rust,ignore
//! fn main() {
//!     let _resources = resource_contexts::global::install(EngineConfig::from_env()?);
//!     // ...
//! } // queued finalizer jobs are flushed, then the global context drains
//! ```

use crate::config::{self, EngineConfig};
use crate::context::ResourceContext;
use crate::errors::CompositeCleanupError;
use crate::finalizer;
use once_cell::sync::Lazy;
use tracing::{debug, error, warn};

static GLOBAL_CONTEXT: Lazy<ResourceContext> = Lazy::new(|| {
    let ctx = ResourceContext::new();
    debug!(context_id = %ctx.id(), "Global resource context created");
    ctx
});

/// Returns a handle to the global context.
#[must_use]
pub fn global_context() -> ResourceContext {
    GLOBAL_CONTEXT.clone()
}

/// Runs every action pending in the global context.
///
/// Safe to call at any time and any number of times.
pub fn drain_global() -> Result<(), CompositeCleanupError> {
    GLOBAL_CONTEXT.cleanup()
}

/// Activates `config`, creates the global context and returns the guard
/// that drains it at exit.
#[must_use = "the global context is drained when the guard is dropped"]
pub fn install(config: EngineConfig) -> GlobalContextGuard {
    config::set_active(config);
    Lazy::force(&GLOBAL_CONTEXT);
    GlobalContextGuard { _private: () }
}

/// Drains the global context when dropped.
///
/// Queued finalizer jobs are given up to the configured exit flush timeout
/// to finish first, since they may release resources the global context
/// still depends on.
#[derive(Debug)]
pub struct GlobalContextGuard {
    _private: (),
}

impl GlobalContextGuard {
    /// Flushes finalizers and drains now, returning the cleanup outcome.
    pub fn finish(self) -> Result<(), CompositeCleanupError> {
        let result = Self::shutdown();
        std::mem::forget(self);
        result
    }

    fn shutdown() -> Result<(), CompositeCleanupError> {
        let timeout = config::active().exit_flush_timeout();
        if !finalizer::wait_for_finalizers(timeout) {
            warn!(
                pending = finalizer::pending_finalizers(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Finalizer jobs still pending at exit"
            );
        }
        drain_global()
    }
}

impl Drop for GlobalContextGuard {
    fn drop(&mut self) {
        if let Err(err) = Self::shutdown() {
            error!(
                failures = ?err.to_dict(),
                "Failed to drain global resource context at exit"
            );
        }
    }
}
