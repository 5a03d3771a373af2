//! Scope constructs.
//!
//! A scope creates a fresh context, runs a body with it as the current
//! context and cleans the context up on every exit path: normal return,
//! error return, panic and (for async scopes) cancellation.

mod current;

pub use current::{current_context, try_current_context, CallSite};

use crate::context::{panic_message, ResourceContext};
use crate::errors::{CompositeCleanupError, ScopeError};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Runs `body` inside a fresh resource context.
///
/// The context is the current context of this thread while `body` runs
/// and is cleaned up when it returns. A body error and a cleanup failure
/// are both reported; see [`ScopeError`]. If `body` panics, cleanup still
/// runs, its failures are logged and the panic continues.
///
/// ```rust,ignore
/// let path = scope(|ctx| {
///     let dir = resources::temp_dir(ctx)?;
///     std::fs::write(dir.join("data"), b"...")?;
///     Ok::<_, ContextError>(dir)
/// })?;
/// ```
pub fn scope<R, E, F>(body: F) -> Result<R, ScopeError<E>>
where
    F: FnOnce(&ResourceContext) -> Result<R, E>,
{
    let ctx = ResourceContext::new();
    let guard = ScopeGuard::enter(ctx.clone());
    let result = body(&ctx);
    let cleanup = guard.exit();
    combine(result, cleanup)
}

/// Async form of [`scope`].
///
/// The context is bound as the task-local current context of the body
/// future. If the returned future is dropped before completion, cleanup
/// runs from the drop and its failures are logged.
pub async fn scope_async<R, E, F, Fut>(body: F) -> Result<R, ScopeError<E>>
where
    F: FnOnce(ResourceContext) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let ctx = ResourceContext::new();
    let mut guard = DropCleanup::new(ctx.clone());

    let outcome = current::within_task(
        ctx.clone(),
        AssertUnwindSafe(body(ctx.clone())).catch_unwind(),
    )
    .await;

    guard.disarm();
    let cleanup = ctx.cleanup();

    match outcome {
        Ok(result) => combine(result, cleanup),
        Err(panic) => {
            if let Err(err) = cleanup {
                log_unwind_cleanup_failure(&ctx, &err, &panic_message(panic.as_ref()));
            }
            std::panic::resume_unwind(panic)
        }
    }
}

fn combine<R, E>(
    result: Result<R, E>,
    cleanup: Result<(), CompositeCleanupError>,
) -> Result<R, ScopeError<E>> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(ScopeError::Cleanup(cleanup)),
        (Err(body), Ok(())) => Err(ScopeError::Body(body)),
        (Err(body), Err(cleanup)) => Err(ScopeError::BodyAndCleanup { body, cleanup }),
    }
}

fn log_unwind_cleanup_failure(ctx: &ResourceContext, err: &CompositeCleanupError, reason: &str) {
    error!(
        context_id = %ctx.id(),
        reason,
        failures = ?err.to_dict(),
        "Cleanup failed while leaving resource scope abnormally"
    );
}

/// Sync scope bookkeeping; cleans up on unwind.
struct ScopeGuard {
    current: Option<current::CurrentContextGuard>,
    cleanup: DropCleanup,
}

impl ScopeGuard {
    fn enter(ctx: ResourceContext) -> Self {
        Self {
            current: Some(current::enter(ctx.clone())),
            cleanup: DropCleanup::new(ctx),
        }
    }

    fn exit(mut self) -> Result<(), CompositeCleanupError> {
        // leave the scope before running its cleanup
        self.current.take();
        self.cleanup.disarm();
        self.cleanup.ctx.cleanup()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.current.take();
    }
}

/// Cleans the context up when dropped unless disarmed.
struct DropCleanup {
    ctx: ResourceContext,
    armed: bool,
}

impl DropCleanup {
    fn new(ctx: ResourceContext) -> Self {
        Self { ctx, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DropCleanup {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let reason = if std::thread::panicking() {
            "panic"
        } else {
            "cancelled"
        };
        if let Err(err) = self.ctx.cleanup() {
            log_unwind_cleanup_failure(&self.ctx, &err, reason);
        }
    }
}
