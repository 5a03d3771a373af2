//! Moving cleanup from scope exit to the lifetime of a value.

use super::{schedule, FinalizerJob};
use crate::context::ResourceContext;
use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// A value whose drop triggers cleanup of a detached context.
///
/// Returned by [`ResourceContext::detach`]. Wrap it in an `Arc` to share
/// the value; cleanup then runs once the last clone is dropped.
pub struct Detached<V> {
    value: V,
    ctx: Option<ResourceContext>,
}

impl<V> Detached<V> {
    /// Returns the context whose cleanup this value owns.
    #[must_use]
    pub fn context(&self) -> Option<&ResourceContext> {
        self.ctx.as_ref()
    }
}

impl ResourceContext {
    /// Transfers cleanup ownership from scope exit to `value`'s lifetime.
    ///
    /// The context is marked detached, so explicit cleanup (including the
    /// enclosing scope's exit) becomes a no-op. When the returned wrapper is
    /// dropped, a finalizer job cleans the context up on the worker thread.
    pub fn detach<V>(&self, value: V) -> Detached<V> {
        self.mark_detached();
        debug!(context_id = %self.id(), "Resource context detached");
        Detached {
            value,
            ctx: Some(self.clone()),
        }
    }
}

/// Free-function form of [`ResourceContext::detach`].
pub fn detach<V>(ctx: &ResourceContext, value: V) -> Detached<V> {
    ctx.detach(value)
}

impl<V> Deref for Detached<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<V> DerefMut for Detached<V> {
    fn deref_mut(&mut self) -> &mut V {
        &mut self.value
    }
}

impl<V> AsRef<V> for Detached<V> {
    fn as_ref(&self) -> &V {
        &self.value
    }
}

impl<V: fmt::Debug> fmt::Debug for Detached<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detached")
            .field("value", &self.value)
            .field("context", &self.ctx.as_ref().map(ResourceContext::id))
            .finish()
    }
}

impl<V> Drop for Detached<V> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            schedule(FinalizerJob::new(ctx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer::wait_for_finalizers;
    use crate::scope::scope;
    use crate::testing::ActionLog;
    use std::convert::Infallible;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_detach_returns_value() {
        let ctx = ResourceContext::new();
        let mut value = ctx.detach(vec![1, 2, 3]);

        value.push(4);
        assert_eq!(*value, vec![1, 2, 3, 4]);
        assert!(ctx.is_detached());
        assert!(value.context().unwrap().ptr_eq(&ctx));
    }

    #[test]
    fn test_detach_then_finalize() {
        let log = ActionLog::new();
        let action_log = log.clone();

        let value = scope(|ctx| {
            ctx.register(action_log.action(1));
            ctx.register(action_log.action(2));
            Ok::<_, Infallible>(ctx.detach(String::from("payload")))
        })
        .unwrap();

        // Scope exit performed no cleanup.
        assert!(log.entries().is_empty());
        assert_eq!(value.as_str(), "payload");

        drop(value);

        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert_eq!(log.entries(), vec![2, 1]);
    }

    #[test]
    fn test_shared_detached_value_finalizes_after_last_clone() {
        let log = ActionLog::new();
        let ctx = ResourceContext::new();
        ctx.register(log.action(1));

        let shared = Arc::new(detach(&ctx, 5_u32));
        let other = Arc::clone(&shared);
        drop(ctx);

        drop(shared);
        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert!(log.entries().is_empty());
        assert_eq!(**other, 5);

        drop(other);
        assert!(wait_for_finalizers(Duration::from_secs(5)));
        assert_eq!(log.entries(), vec![1]);
    }
}
