//! Shared handles to context-owned resources.

use super::{CleanupAction, Close, ResourceContext};
use crate::errors::{BoxError, ContextError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A resource owned by a [`ResourceContext`].
///
/// The context closes the resource during cleanup. Until then any clone of
/// the handle can reach it through [`Managed::with`]; afterwards access
/// fails with [`ContextError::Closed`].
pub struct Managed<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T: Close> Managed<T> {
    pub(crate) fn register(ctx: &ResourceContext, value: T) -> Self {
        let slot = Arc::new(Mutex::new(Some(value)));
        let owned = Arc::clone(&slot);

        ctx.register(
            CleanupAction::new(move || {
                let taken = owned.lock().take();
                match taken {
                    Some(value) => value.close().map_err(BoxError::from),
                    None => Ok(()),
                }
            })
            .named(std::any::type_name::<T>()),
        );

        Self { slot }
    }
}

impl<T> Managed<T> {
    /// Runs `f` with mutable access to the resource.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, ContextError> {
        let mut guard = self.slot.lock();
        match guard.as_mut() {
            Some(value) => Ok(f(value)),
            None => Err(ContextError::closed(std::any::type_name::<T>())),
        }
    }

    /// Returns true once the owning context has closed the resource.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Managed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Managed")
            .field("resource", &std::any::type_name::<T>())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted(Arc<AtomicUsize>, u32);

    impl Close for Counted {
        fn close(self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    impl Close for Broken {
        fn close(self) -> anyhow::Result<()> {
            anyhow::bail!("refused to close")
        }
    }

    #[test]
    fn test_managed_access_until_cleanup() {
        let closes = Arc::new(AtomicUsize::new(0));
        let ctx = ResourceContext::new();
        let handle = ctx.manage(Counted(closes.clone(), 7));

        assert_eq!(handle.with(|c| c.1).unwrap(), 7);
        assert!(!handle.is_closed());

        ctx.cleanup().unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.with(|c| c.1),
            Err(ContextError::Closed { .. })
        ));
    }

    #[test]
    fn test_managed_clones_share_resource() {
        let ctx = ResourceContext::new();
        let handle = ctx.manage(Counted(Arc::new(AtomicUsize::new(0)), 1));
        let other = handle.clone();

        other.with(|c| c.1 = 2).unwrap();
        assert_eq!(handle.with(|c| c.1).unwrap(), 2);
    }

    #[test]
    fn test_managed_close_failure_is_reported() {
        let ctx = ResourceContext::new();
        let _handle = ctx.manage(Broken);

        let err = ctx.cleanup().unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.primary().label.ends_with("Broken"));
        assert!(err.primary().cause().to_string().contains("refused to close"));
    }
}
