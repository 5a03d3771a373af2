//! Deferred cleanup actions.

use crate::context::Close;
use crate::errors::{BoxError, CleanupActionError};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

type ActionFn = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// A cleanup action registered on a context.
///
/// Either an arbitrary zero-argument procedure or a resource handle closed
/// through its [`Close`] implementation.
pub struct CleanupAction {
    /// Optional label used in errors and logs.
    label: Option<String>,
    /// The deferred procedure.
    run: ActionFn,
}

impl CleanupAction {
    /// Creates an action from a fallible procedure.
    pub fn new<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            label: None,
            run: Box::new(move || f().map_err(Into::into)),
        }
    }

    /// Creates an action from a procedure that cannot fail.
    pub fn infallible<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            label: None,
            run: Box::new(move || {
                f();
                Ok(())
            }),
        }
    }

    /// Creates an action that closes `resource`.
    ///
    /// The label defaults to the resource's type name.
    pub fn close<T: Close>(resource: T) -> Self {
        Self {
            label: Some(std::any::type_name::<T>().to_string()),
            run: Box::new(move || resource.close().map_err(Into::into)),
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the label, or `<unnamed>`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("<unnamed>")
    }

    /// Runs the action, converting an error or panic into a
    /// [`CleanupActionError`].
    pub(crate) fn run(self) -> Result<(), CleanupActionError> {
        let label = self.label().to_string();
        let run = self.run;

        match catch_unwind(AssertUnwindSafe(run)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(CleanupActionError::new(label, err)),
            Err(panic) => Err(CleanupActionError::new(
                label,
                format!("cleanup action panicked: {}", panic_message(panic.as_ref())),
            )),
        }
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupAction")
            .field("label", &self.label())
            .finish_non_exhaustive()
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnamed_label() {
        let action = CleanupAction::infallible(|| {});
        assert_eq!(action.label(), "<unnamed>");
    }

    #[test]
    fn test_named_label() {
        let action = CleanupAction::infallible(|| {}).named("close socket");
        assert_eq!(action.label(), "close socket");
    }

    #[test]
    fn test_run_error() {
        let action = CleanupAction::new(|| Err("boom")).named("explode");
        let err = action.run().unwrap_err();
        assert_eq!(err.label, "explode");
        assert_eq!(err.cause().to_string(), "boom");
    }

    #[test]
    fn test_run_panic_is_caught() {
        let action = CleanupAction::infallible(|| panic!("Intentional"));
        let err = action.run().unwrap_err();
        assert!(err.cause().to_string().contains("Intentional"));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");

        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
