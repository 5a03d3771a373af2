//! Resource contexts and cleanup actions.
//!
//! This module provides:
//! - `ResourceContext`, the ordered collection of pending cleanup actions
//! - `CleanupAction` and the `Close` trait for resource handles
//! - `Managed<T>` handles to resources owned by a context

mod action;
mod close;
mod managed;
mod resource_context;

pub use action::CleanupAction;
pub(crate) use action::panic_message;
pub use close::Close;
pub use managed::Managed;
pub use resource_context::{CleanupTrigger, ResourceContext};
