//! # Resource Contexts
//!
//! Deterministic, scope-bound cleanup of stateful resources.
//!
//! A [`ResourceContext`] collects cleanup actions as resources are acquired
//! and runs them in reverse order when the context is cleaned up. Around
//! that core the crate provides:
//!
//! - **Scopes**: [`scope`] and [`scope_async`] bind a fresh context for the
//!   duration of a body and clean it up on every exit path
//! - **Implicit contexts**: [`here!`] calls an operation with the current
//!   context, falling back to the process-wide [`global_context`]
//! - **Detachment**: [`detach`] hands a context's cleanup over to the
//!   finalizer worker once a returned value is dropped
//! - **Callback adaptation**: [`adapt_callback`] turns "pass me a callback"
//!   acquisition APIs into direct return values
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resource_contexts::prelude::*;
//!
//! resource_fn! {
//!     pub fn scratch_file(ctx, name: &str) -> Result<Managed<File>, ContextError> {
//!         let dir = resources::temp_dir(ctx)?;
//!         resources::create_file(ctx, &dir.join(name))
//!     }
//! }
//!
//! scope(|ctx| {
//!     let file = scratch_file(ctx, "out.txt")?;
//!     file.with(|f| f.write_all(b"hello"))??;
//!     Ok::<_, ContextError>(())
//! })?; // file closed, then directory removed
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

#[macro_use]
mod macros;

pub mod adapter;
pub mod config;
pub mod context;
pub mod errors;
pub mod finalizer;
pub mod global;
pub mod observability;
pub mod resources;
pub mod scope;
pub mod testing;


pub use adapter::adapt_callback;
pub use config::{EngineConfig, LogFormat};
pub use context::{CleanupAction, CleanupTrigger, Close, Managed, ResourceContext};
pub use errors::{
    AdapterPhase, AdapterTaskFailure, BoxError, CleanupActionError, CompositeCleanupError,
    ContextError, ScopeError,
};
pub use finalizer::{detach, pending_finalizers, wait_for_finalizers, Detached};
pub use global::{drain_global, global_context, GlobalContextGuard};
pub use scope::{current_context, scope, scope_async, try_current_context, CallSite};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapter::adapt_callback;
    pub use crate::config::EngineConfig;
    pub use crate::context::{CleanupAction, Close, Managed, ResourceContext};
    pub use crate::errors::{CompositeCleanupError, ContextError, ScopeError};
    pub use crate::finalizer::{detach, Detached};
    pub use crate::global::{drain_global, global_context};
    pub use crate::resources;
    pub use crate::scope::{current_context, scope, scope_async, CallSite};
    pub use crate::{here, resource_fn};
}
