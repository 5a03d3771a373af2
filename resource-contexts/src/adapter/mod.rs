//! Callback adapter.
//!
//! Some acquisition APIs only lend their resource to a callback and tear it
//! down in their own frame once the callback returns:
//!
//! ```rust,ignore
//! fn with_connection<R>(url: &str, f: impl FnOnce(Connection) -> R) -> io::Result<R>;
//! ```
//!
//! [`adapt_callback`] turns such an API into a direct return value. The
//! acquisition function runs on a dedicated child thread with a proxy
//! callback. When the proxy receives the resource it hands it to the caller
//! and blocks. The caller registers a deferred action on the context; when
//! cleanup runs that action, the child is resumed, the proxy returns inside
//! the acquisition function's frame and its teardown runs.
//!
//! The caller and the child never run at the same time: every hand-off goes
//! through a zero-capacity channel.

use crate::context::{panic_message, CleanupAction, ResourceContext};
use crate::errors::{AdapterTaskFailure, BoxError};
use crossbeam::channel::{bounded, Receiver, RecvError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Messages from the child to whichever thread is waiting on it.
enum ChildEvent<T> {
    /// The proxy received the resource.
    Ready(T),
    /// The acquisition function returned successfully.
    Finished,
    /// The acquisition function failed or panicked.
    Failed(BoxError),
}

/// Runs callback-style `acquire` and returns the value it passes to its
/// callback.
///
/// Teardown inside `acquire` is postponed until `ctx` is cleaned up. A
/// failure before the callback was invoked is returned as a setup-phase
/// [`AdapterTaskFailure`]; a failure after it surfaces as a teardown-phase
/// failure from the cleanup pass, on whichever thread runs it.
///
/// If the deferred action is dropped without running, the child is
/// released and teardown still happens.
pub fn adapt_callback<T, E, F>(ctx: &ResourceContext, acquire: F) -> Result<T, AdapterTaskFailure>
where
    T: Send + 'static,
    E: Into<BoxError> + 'static,
    F: FnOnce(&mut dyn FnMut(T)) -> Result<(), E> + Send + 'static,
{
    let (to_caller, from_child) = bounded::<ChildEvent<T>>(0);
    let (resume_child, resumed) = bounded::<()>(0);

    let handle = thread::Builder::new()
        .name("callback-adapter".to_string())
        .spawn(move || run_child(acquire, &to_caller, &resumed))
        .map_err(AdapterTaskFailure::setup)?;

    match from_child.recv() {
        Ok(ChildEvent::Ready(value)) => {
            debug!(context_id = %ctx.id(), "Callback adapter acquired resource");
            ctx.register(
                CleanupAction::new(move || {
                    // A closed resume channel only means the child already
                    // finished; its outcome is still waiting below.
                    let _ = resume_child.send(());
                    finish_child(&from_child, handle).map_err(BoxError::from)
                })
                .named("callback adapter teardown"),
            );
            Ok(value)
        }
        Ok(ChildEvent::Failed(err)) => {
            join_child(handle);
            Err(AdapterTaskFailure::setup(err))
        }
        Ok(ChildEvent::Finished) => {
            join_child(handle);
            Err(AdapterTaskFailure::setup(
                "acquisition function returned without invoking its callback",
            ))
        }
        Err(RecvError) => {
            join_child(handle);
            Err(AdapterTaskFailure::setup(
                "callback adapter task exited without reporting",
            ))
        }
    }
}

fn run_child<T, E, F>(
    acquire: F,
    to_caller: &Sender<ChildEvent<T>>,
    resumed: &Receiver<()>,
) where
    E: Into<BoxError>,
    F: FnOnce(&mut dyn FnMut(T)) -> Result<(), E>,
{
    let mut handed_off = false;
    let mut proxy = |value: T| {
        if handed_off {
            warn!("Callback adapter proxy invoked more than once; ignoring");
            return;
        }
        handed_off = true;
        if to_caller.send(ChildEvent::Ready(value)).is_ok() {
            // Suspended until cleanup resumes us or drops the resume handle.
            let _ = resumed.recv();
        }
    };

    let event = match catch_unwind(AssertUnwindSafe(|| acquire(&mut proxy))) {
        Ok(Ok(())) => ChildEvent::Finished,
        Ok(Err(err)) => ChildEvent::Failed(err.into()),
        Err(panic) => ChildEvent::Failed(
            format!("acquisition function panicked: {}", panic_message(panic.as_ref())).into(),
        ),
    };

    // Nobody is listening if the deferred action was discarded.
    let _ = to_caller.send(event);
}

fn finish_child<T>(
    from_child: &Receiver<ChildEvent<T>>,
    handle: JoinHandle<()>,
) -> Result<(), AdapterTaskFailure> {
    let outcome = match from_child.recv() {
        Ok(ChildEvent::Finished) => Ok(()),
        Ok(ChildEvent::Failed(err)) => Err(AdapterTaskFailure::teardown(err)),
        Ok(ChildEvent::Ready(_)) => Err(AdapterTaskFailure::teardown(
            "callback adapter task handed over a second resource",
        )),
        Err(RecvError) => Err(AdapterTaskFailure::teardown(
            "callback adapter task exited without reporting",
        )),
    };
    join_child(handle);
    outcome
}

fn join_child(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("Callback adapter task panicked outside the acquisition function");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AdapterPhase;
    use crate::finalizer::wait_for_finalizers;
    use crate::testing::ActionLog;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_adapter_success() {
        let ctx = ResourceContext::new();
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();

        let value = adapt_callback(&ctx, move |f| {
            let r = 40;
            f(r);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        })
        .unwrap();

        assert_eq!(value, 40);
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.pending_count(), 1);

        ctx.cleanup().unwrap();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);

        ctx.cleanup().unwrap();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adapter_setup_failure() {
        let ctx = ResourceContext::new();

        let err = adapt_callback(&ctx, |_f: &mut dyn FnMut(u32)| Err("boom")).unwrap_err();

        assert_eq!(err.phase, AdapterPhase::Setup);
        assert_eq!(err.cause().to_string(), "boom");
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_adapter_setup_panic() {
        let ctx = ResourceContext::new();

        let err = adapt_callback(&ctx, |_f: &mut dyn FnMut(u32)| -> Result<(), BoxError> {
            panic!("Intentional")
        })
        .unwrap_err();

        assert_eq!(err.phase, AdapterPhase::Setup);
        assert!(err.cause().to_string().contains("Intentional"));
    }

    #[test]
    fn test_adapter_callback_never_invoked() {
        let ctx = ResourceContext::new();

        let err =
            adapt_callback(&ctx, |_f: &mut dyn FnMut(u32)| Ok::<(), BoxError>(())).unwrap_err();

        assert_eq!(err.phase, AdapterPhase::Setup);
    }

    #[test]
    fn test_adapter_teardown_failure() {
        let ctx = ResourceContext::new();

        let value = adapt_callback(&ctx, |f| {
            f(1);
            Err("boom2")
        })
        .unwrap();
        assert_eq!(value, 1);

        let err = ctx.cleanup().unwrap_err();
        assert_eq!(err.len(), 1);
        let failure = err.primary().downcast_ref::<AdapterTaskFailure>().unwrap();
        assert_eq!(failure.phase, AdapterPhase::Teardown);
        assert_eq!(failure.cause().to_string(), "boom2");
    }

    #[test]
    fn test_adapter_teardown_order_with_other_actions() {
        let ctx = ResourceContext::new();
        let log = ActionLog::new();
        let teardown_log = log.clone();

        ctx.register(log.action(1));
        let value = adapt_callback(&ctx, move |f| {
            f("resource");
            teardown_log.push(2);
            Ok::<(), BoxError>(())
        })
        .unwrap();
        ctx.register(log.action(3));

        assert_eq!(value, "resource");
        ctx.cleanup().unwrap();
        assert_eq!(log.entries(), vec![3, 2, 1]);
    }

    #[test]
    fn test_adapter_cleanup_from_another_thread() {
        let ctx = ResourceContext::new();
        let teardown_thread = Arc::new(parking_lot::Mutex::new(None));
        let slot = teardown_thread.clone();

        adapt_callback(&ctx, move |f| {
            f(());
            *slot.lock() = thread::current().name().map(String::from);
            Ok::<(), BoxError>(())
        })
        .unwrap();

        let remote = ctx.clone();
        thread::spawn(move || remote.cleanup()).join().unwrap().unwrap();

        assert_eq!(
            teardown_thread.lock().as_deref(),
            Some("callback-adapter")
        );
    }

    #[test]
    fn test_adapter_detached_cleanup_runs_on_finalizer() {
        let ctx = ResourceContext::new();
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();

        let value = adapt_callback(&ctx, move |f| {
            f(vec![1_u8, 2, 3]);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        })
        .unwrap();
        let detached = ctx.detach(value);

        ctx.cleanup().unwrap();
        assert_eq!(teardowns.load(Ordering::SeqCst), 0);

        drop(detached);
        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adapter_discarded_action_releases_child() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = teardowns.clone();
        let (done_tx, done_rx) = bounded::<()>(1);

        let ctx = ResourceContext::new();
        adapt_callback(&ctx, move |f| {
            f(0_i32);
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
            Ok::<(), BoxError>(())
        })
        .unwrap();

        drop(ctx);

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }
}
