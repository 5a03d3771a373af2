//! Resolution of the "current" resource context.
//!
//! Sync scopes push their context onto a thread-local stack for the length
//! of the body. Async scopes push theirs for the length of each poll of the
//! body future, so whichever scope was entered last is on top of the stack
//! whether it is sync or async. The async context is also bound as a tokio
//! task-local, which lookup falls back to when the stack is empty.

use crate::config;
use crate::context::ResourceContext;
use crate::global;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::Location;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{info, warn};

thread_local! {
    static SCOPE_STACK: RefCell<Vec<ResourceContext>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_CONTEXT: ResourceContext;
}

/// Where an implicit context lookup was made from.
///
/// Only affects the severity of the diagnostic emitted on global fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    /// Top-level or interactive code, where relying on the global context
    /// is a convenience. Fallback is reported at `info`.
    Interactive,
    /// Code inside an ordinary function, where fallback usually means a
    /// resource will leak until the global context is drained. Fallback is
    /// reported at `warn`.
    Function,
}

/// Pops the thread-local entry pushed by [`enter`] when dropped.
pub(crate) struct CurrentContextGuard {
    // the stack is per thread
    _not_send: PhantomData<*const ()>,
}

impl Drop for CurrentContextGuard {
    fn drop(&mut self) {
        let _ = SCOPE_STACK.try_with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Makes `ctx` the current context of this thread until the guard drops.
pub(crate) fn enter(ctx: ResourceContext) -> CurrentContextGuard {
    SCOPE_STACK.with(|stack| stack.borrow_mut().push(ctx));
    CurrentContextGuard {
        _not_send: PhantomData,
    }
}

/// Runs `future` with `ctx` as its current context.
///
/// `ctx` is on top of the thread-local stack while the future is polled and
/// is the task-local context throughout.
pub(crate) fn within_task<F: Future>(
    ctx: ResourceContext,
    future: F,
) -> impl Future<Output = F::Output> {
    TASK_CONTEXT.scope(
        ctx.clone(),
        EnterOnPoll {
            ctx,
            future: Box::pin(future),
        },
    )
}

/// Enters `ctx` around every poll of the wrapped future.
struct EnterOnPoll<F> {
    ctx: ResourceContext,
    future: Pin<Box<F>>,
}

impl<F: Future> Future for EnterOnPoll<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let _current = enter(self.ctx.clone());
        self.future.as_mut().poll(cx)
    }
}

/// Returns the innermost active scope context, if any.
#[must_use]
pub fn try_current_context() -> Option<ResourceContext> {
    SCOPE_STACK
        .try_with(|stack| stack.borrow().last().cloned())
        .ok()
        .flatten()
        .or_else(|| TASK_CONTEXT.try_with(ResourceContext::clone).ok())
}

/// Returns the innermost active scope context, or the global context.
///
/// Falling back to the global context is not an error, but it is reported
/// with the caller's location so leaks can be traced back. The severity
/// depends on `call_site`.
#[track_caller]
pub fn current_context(call_site: CallSite) -> ResourceContext {
    if let Some(ctx) = try_current_context() {
        return ctx;
    }

    if config::fallback_diagnostics_enabled() {
        let location = Location::caller();
        match call_site {
            CallSite::Interactive => info!(
                %location,
                "No active resource scope; using the global context"
            ),
            CallSite::Function => warn!(
                %location,
                "No active resource scope; resources registered here stay in the global \
                 context until it is drained"
            ),
        }
    }

    global::global_context()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{capture_events, CapturedEvent};
    use serial_test::serial;
    use tracing::Level;

    fn fallback_events(events: &[CapturedEvent]) -> Vec<&CapturedEvent> {
        events
            .iter()
            .filter(|e| e.message.starts_with("No active resource scope"))
            .collect()
    }

    #[test]
    fn test_no_current_context_outside_scope() {
        assert!(try_current_context().is_none());
    }

    #[test]
    fn test_enter_and_leave() {
        let ctx = ResourceContext::new();
        {
            let _guard = enter(ctx.clone());
            assert!(try_current_context().unwrap().ptr_eq(&ctx));
        }
        assert!(try_current_context().is_none());
    }

    #[test]
    fn test_nested_enter_resolves_innermost() {
        let outer = ResourceContext::new();
        let inner = ResourceContext::new();

        let _outer_guard = enter(outer.clone());
        {
            let _inner_guard = enter(inner.clone());
            assert!(current_context(CallSite::Function).ptr_eq(&inner));
        }
        assert!(current_context(CallSite::Function).ptr_eq(&outer));
    }

    #[tokio::test]
    async fn test_task_local_context() {
        let ctx = ResourceContext::new();
        let expected = ctx.clone();

        within_task(ctx, async move {
            tokio::task::yield_now().await;
            assert!(try_current_context().unwrap().ptr_eq(&expected));
        })
        .await;

        assert!(try_current_context().is_none());
    }

    #[tokio::test]
    async fn test_thread_local_shadows_task_local() {
        let task_ctx = ResourceContext::new();
        let sync_ctx = ResourceContext::new();
        let expected_sync = sync_ctx.clone();

        within_task(task_ctx, async move {
            let _guard = enter(sync_ctx);
            assert!(try_current_context().unwrap().ptr_eq(&expected_sync));
        })
        .await;
    }

    #[test]
    #[serial(global_context)]
    fn test_function_fallback_warns_with_location() {
        let (ctx, events) = capture_events(|| current_context(CallSite::Function));

        assert!(ctx.ptr_eq(&global::global_context()));
        let fallback = fallback_events(&events);
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].level, Level::WARN);
        assert!(fallback[0]
            .field("location")
            .is_some_and(|l| l.contains("current.rs")));
    }

    #[test]
    #[serial(global_context)]
    fn test_interactive_fallback_is_info() {
        let (_, events) = capture_events(|| current_context(CallSite::Interactive));

        let fallback = fallback_events(&events);
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].level, Level::INFO);
    }

    #[test]
    #[serial(global_context)]
    fn test_fallback_diagnostics_can_be_disabled() {
        let previous = config::active();
        config::set_active(previous.clone().with_fallback_diagnostics(false));

        let (_, events) = capture_events(|| {
            current_context(CallSite::Function);
            current_context(CallSite::Interactive);
        });
        config::set_active(previous);

        assert!(fallback_events(&events).is_empty());
    }

    #[test]
    fn test_no_diagnostic_inside_scope() {
        let ctx = ResourceContext::new();
        let _guard = enter(ctx.clone());

        let (resolved, events) = capture_events(|| current_context(CallSite::Function));

        assert!(resolved.ptr_eq(&ctx));
        assert!(fallback_events(&events).is_empty());
    }
}
