//! Testing utilities for code built on resource contexts.
//!
//! This module provides:
//! - `ActionLog` for recording the order cleanup actions ran in
//! - `failing_action` for an action that always fails
//! - `capture_events` for asserting on emitted diagnostics

use crate::context::CleanupAction;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Records the order in which cleanup actions executed.
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    entries: Arc<Mutex<Vec<usize>>>,
}

impl ActionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `id` to the log.
    pub fn push(&self, id: usize) {
        self.entries.lock().push(id);
    }

    /// Returns an action that appends `id` when it runs.
    #[must_use]
    pub fn action(&self, id: usize) -> CleanupAction {
        let log = self.clone();
        CleanupAction::infallible(move || log.push(id)).named(format!("record {id}"))
    }

    /// Returns the recorded ids in execution order.
    #[must_use]
    pub fn entries(&self) -> Vec<usize> {
        self.entries.lock().clone()
    }
}

/// Returns an action labelled `label` that fails with `"{label} failed"`.
#[must_use]
pub fn failing_action(label: &str) -> CleanupAction {
    let message = format!("{label} failed");
    CleanupAction::new(move || Err(message)).named(label)
}

/// A tracing event recorded by [`capture_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// The event's `message` field.
    pub message: String,
    /// Every other field, formatted.
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    /// Returns the formatted value of `name`, if the event carried it.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}

struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Runs `f` with a subscriber recording every event emitted on this thread.
pub fn capture_events<R>(f: impl FnOnce() -> R) -> (R, Vec<CapturedEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        events: Arc::clone(&events),
    });

    let result = tracing::subscriber::with_default(subscriber, f);
    let captured = std::mem::take(&mut *events.lock());
    (result, captured)
}
