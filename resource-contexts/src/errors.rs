//! Error types for resource contexts.
//!
//! Cleanup never short-circuits, so a single cleanup pass can produce many
//! failures. They are collected into one [`CompositeCleanupError`] whose
//! entries are ordered the way the actions were attempted: most recently
//! registered first.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Boxed error carried by cleanup actions and adapter tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for resource context operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Acquiring a resource failed before any cleanup was registered.
    #[error("failed to acquire {resource}: {source}")]
    Setup {
        /// Description of the resource being acquired.
        resource: String,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },

    /// One or more cleanup actions failed.
    #[error(transparent)]
    Cleanup(#[from] CompositeCleanupError),

    /// A callback adapter task failed.
    #[error(transparent)]
    AdapterTask(#[from] AdapterTaskFailure),

    /// A managed resource was used after its context closed it.
    #[error("{resource} has already been closed")]
    Closed {
        /// Type name of the closed resource.
        resource: String,
    },

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContextError {
    /// Creates a setup error for the named resource.
    pub fn setup(resource: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Setup {
            resource: resource.into(),
            source: source.into(),
        }
    }

    /// Creates a closed-resource error.
    pub fn closed(resource: impl Into<String>) -> Self {
        Self::Closed {
            resource: resource.into(),
        }
    }
}

/// Failure of a single deferred action during cleanup.
#[derive(Debug, Error)]
#[error("cleanup action '{label}' failed: {source}")]
pub struct CleanupActionError {
    /// Label of the failed action (`<unnamed>` when none was given).
    pub label: String,
    /// The underlying failure.
    #[source]
    pub source: BoxError,
}

impl CleanupActionError {
    /// Creates a new cleanup action error.
    pub fn new(label: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
        }
    }

    /// Returns the underlying failure.
    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Attempts to downcast the underlying failure to a concrete type.
    #[must_use]
    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        self.source.downcast_ref::<T>()
    }
}

/// All failures produced by one cleanup pass.
///
/// `failures()[0]` is the failure of the most recently registered action;
/// each following entry was registered earlier than the one before it.
///
/// [`std::error::Error::source`] yields only the first failure, whose own
/// source is its cause. Earlier failures are reachable through
/// [`failures`](Self::failures) and [`iter`](Self::iter), not by walking the
/// source chain.
#[derive(Debug)]
pub struct CompositeCleanupError {
    failures: Vec<CleanupActionError>,
}

impl CompositeCleanupError {
    /// Builds a composite error from failures in attempt order.
    ///
    /// Returns `None` when there were no failures.
    #[must_use]
    pub fn from_failures(failures: Vec<CleanupActionError>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    /// Returns the failures, most recently registered first.
    #[must_use]
    pub fn failures(&self) -> &[CleanupActionError] {
        &self.failures
    }

    /// Returns the failure of the most recently registered action.
    #[must_use]
    pub fn primary(&self) -> &CleanupActionError {
        // never empty, see from_failures
        &self.failures[0]
    }

    /// Returns the number of failed actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always false; a composite error holds at least one failure.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Iterates the failures from most to least recently registered.
    pub fn iter(&self) -> impl Iterator<Item = &CleanupActionError> {
        self.failures.iter()
    }

    /// Consumes the error and returns the failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<CleanupActionError> {
        self.failures
    }

    /// Converts to a dictionary representation for structured logs.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("count".to_string(), serde_json::json!(self.failures.len()));
        map.insert(
            "failures".to_string(),
            serde_json::Value::Array(
                self.failures
                    .iter()
                    .map(|f| {
                        serde_json::json!({
                            "label": f.label,
                            "error": f.source.to_string(),
                        })
                    })
                    .collect(),
            ),
        );
        map
    }
}

impl fmt::Display for CompositeCleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.len() {
            1 => write!(f, "1 cleanup action failed: {}", self.failures[0]),
            n => {
                write!(f, "{n} cleanup actions failed: ")?;
                for (i, failure) in self.failures.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompositeCleanupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f as &(dyn std::error::Error + 'static))
    }
}

/// Phase of a callback adapter task in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterPhase {
    /// Before the acquisition function handed over its resource.
    Setup,
    /// After the resource was handed back for teardown.
    Teardown,
}

impl fmt::Display for AdapterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => f.write_str("setup"),
            Self::Teardown => f.write_str("teardown"),
        }
    }
}

/// Failure of the acquisition function driven by the callback adapter.
#[derive(Debug, Error)]
#[error("callback adapter task failed during {phase}: {source}")]
pub struct AdapterTaskFailure {
    /// Phase in which the failure happened.
    pub phase: AdapterPhase,
    /// The underlying failure.
    #[source]
    pub source: BoxError,
}

impl AdapterTaskFailure {
    /// Creates a setup-phase failure.
    pub fn setup(source: impl Into<BoxError>) -> Self {
        Self {
            phase: AdapterPhase::Setup,
            source: source.into(),
        }
    }

    /// Creates a teardown-phase failure.
    pub fn teardown(source: impl Into<BoxError>) -> Self {
        Self {
            phase: AdapterPhase::Teardown,
            source: source.into(),
        }
    }

    /// Returns the underlying failure.
    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Outcome of a scope whose body or cleanup failed.
///
/// A body error is never masked by a cleanup failure: when both fail, both
/// are kept in [`ScopeError::BodyAndCleanup`].
#[derive(Debug)]
pub enum ScopeError<E> {
    /// The body failed and cleanup succeeded.
    Body(E),
    /// The body succeeded and cleanup failed.
    Cleanup(CompositeCleanupError),
    /// Both the body and cleanup failed.
    BodyAndCleanup {
        /// The body's error.
        body: E,
        /// The cleanup failures.
        cleanup: CompositeCleanupError,
    },
}

impl<E> ScopeError<E> {
    /// Returns the body's error, if the body failed.
    pub fn body(&self) -> Option<&E> {
        match self {
            Self::Body(body) | Self::BodyAndCleanup { body, .. } => Some(body),
            Self::Cleanup(_) => None,
        }
    }

    /// Returns the cleanup failures, if cleanup failed.
    pub fn cleanup(&self) -> Option<&CompositeCleanupError> {
        match self {
            Self::Cleanup(cleanup) | Self::BodyAndCleanup { cleanup, .. } => Some(cleanup),
            Self::Body(_) => None,
        }
    }

    /// Consumes the error and returns the body's error, if any.
    pub fn into_body(self) -> Option<E> {
        match self {
            Self::Body(body) | Self::BodyAndCleanup { body, .. } => Some(body),
            Self::Cleanup(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ScopeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body(body) => write!(f, "{body}"),
            Self::Cleanup(cleanup) => write!(f, "{cleanup}"),
            Self::BodyAndCleanup { body, cleanup } => {
                write!(f, "scope body failed: {body}; cleanup also failed: {cleanup}")
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ScopeError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cleanup()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}
