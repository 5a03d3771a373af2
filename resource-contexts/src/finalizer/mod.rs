//! Drop-triggered cleanup.
//!
//! Cleanup that is tied to a value's lifetime instead of a scope never runs
//! inside the `Drop` that triggers it. The drop only enqueues a job; a
//! dedicated worker thread runs the job later. Failures there have no caller
//! to report to and are logged.
//!
//! A finalizer job may run while other threads still use resources that
//! share state with the context.

mod detached;

pub use detached::{detach, Detached};

use crate::config;
use crate::context::{CleanupTrigger, ResourceContext};
use crossbeam::channel::{unbounded, Sender};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

static WORKER: Lazy<FinalizerWorker> = Lazy::new(FinalizerWorker::start);

/// A cleanup pass queued for the finalizer worker.
pub(crate) struct FinalizerJob {
    ctx: ResourceContext,
}

impl FinalizerJob {
    pub(crate) fn new(ctx: ResourceContext) -> Self {
        Self { ctx }
    }

    fn run(self) {
        let id = self.ctx.id();
        debug!(context_id = %id, "Running finalizer-triggered cleanup");

        if let Err(err) = self.ctx.cleanup_with(CleanupTrigger::Finalizer) {
            for failure in err.iter() {
                error!(
                    context_id = %id,
                    action = %failure.label,
                    error = %failure.source,
                    "Finalizer-triggered cleanup action failed"
                );
            }
            error!(
                context_id = %id,
                failures = err.len(),
                "Finalizer-triggered cleanup failed"
            );
        }
    }
}

#[derive(Default)]
struct PendingJobs {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingJobs {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

struct FinalizerWorker {
    /// `None` when the worker thread could not be spawned.
    sender: Option<Sender<FinalizerJob>>,
    pending: Arc<PendingJobs>,
}

impl FinalizerWorker {
    fn start() -> Self {
        let (sender, receiver) = unbounded::<FinalizerJob>();
        let pending = Arc::new(PendingJobs::default());
        let worker_pending = Arc::clone(&pending);
        let name = config::active().finalizer_thread_name;

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            for job in receiver {
                job.run();
                worker_pending.finish();
            }
        });

        match spawned {
            Ok(_) => {
                debug!(thread = %name, "Finalizer worker started");
                Self {
                    sender: Some(sender),
                    pending,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to spawn finalizer worker; finalizer cleanup will run inline"
                );
                Self {
                    sender: None,
                    pending,
                }
            }
        }
    }

    fn submit(&self, job: FinalizerJob) {
        self.pending.begin();

        let job = match &self.sender {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(returned) => returned.into_inner(),
            },
            None => job,
        };

        job.run();
        self.pending.finish();
    }
}

/// Queues a cleanup job on the finalizer worker.
pub(crate) fn schedule(job: FinalizerJob) {
    WORKER.submit(job);
}

/// Blocks until every queued finalizer job has finished or `timeout`
/// elapses. Returns true if the queue drained.
pub fn wait_for_finalizers(timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let pending = &WORKER.pending;
    let mut count = pending.count.lock();

    while *count > 0 {
        if pending.idle.wait_until(&mut count, deadline).timed_out() {
            return *count == 0;
        }
    }
    true
}

/// Returns the number of queued or running finalizer jobs.
#[must_use]
pub fn pending_finalizers() -> usize {
    *WORKER.pending.count.lock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{capture_events, failing_action, ActionLog};
    use tracing::Level;

    #[test]
    fn test_scheduled_job_runs_on_worker() {
        let ctx = ResourceContext::new();
        let ran_on = Arc::new(Mutex::new(None));
        let slot = ran_on.clone();
        ctx.defer(move || {
            *slot.lock() = thread::current().name().map(String::from);
            Ok::<(), std::io::Error>(())
        });

        schedule(FinalizerJob::new(ctx.clone()));

        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert!(ctx.is_empty());
        assert_eq!(
            ran_on.lock().clone(),
            Some(config::active().finalizer_thread_name)
        );
    }

    #[test]
    fn test_failing_job_is_logged_not_propagated() {
        let ctx = ResourceContext::new();
        let log = ActionLog::new();
        ctx.register(log.action(1));
        ctx.register(failing_action("broken"));

        schedule(FinalizerJob::new(ctx));

        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert_eq!(log.entries(), vec![1]);
    }

    #[test]
    fn test_job_logs_every_failed_action() {
        let ctx = ResourceContext::new();
        ctx.register(failing_action("close socket"));
        ctx.register(failing_action("flush buffer"));

        let ((), events) = capture_events(|| FinalizerJob::new(ctx.clone()).run());

        let failed: Vec<_> = events
            .iter()
            .filter(|e| e.level == Level::ERROR && e.field("action").is_some())
            .collect();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].field("action"), Some("flush buffer"));
        assert_eq!(failed[0].field("error"), Some("flush buffer failed"));
        assert_eq!(failed[1].field("action"), Some("close socket"));
        assert!(events
            .iter()
            .any(|e| e.level == Level::ERROR && e.field("failures") == Some("2")));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_finalizing_context_runs_pending_on_drop() {
        let log = ActionLog::new();
        let ctx = ResourceContext::with_finalizer();
        ctx.register(log.action(1));
        ctx.register(log.action(2));

        drop(ctx);

        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert_eq!(log.entries(), vec![2, 1]);
    }

    #[test]
    fn test_plain_context_drop_discards_actions() {
        let log = ActionLog::new();
        let ctx = ResourceContext::new();
        ctx.register(log.action(1));

        drop(ctx);

        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert!(log.entries().is_empty());
    }
}
