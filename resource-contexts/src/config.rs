//! Engine configuration.

use crate::errors::ContextError;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

static ACTIVE_CONFIG: Lazy<RwLock<EngineConfig>> = Lazy::new(|| RwLock::new(EngineConfig::default()));

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Process-wide settings for the resource context engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether falling back to the global context emits a diagnostic.
    #[serde(default = "default_fallback_diagnostics")]
    pub fallback_diagnostics: bool,
    /// Name of the finalizer worker thread.
    #[serde(default = "default_finalizer_thread_name")]
    pub finalizer_thread_name: String,
    /// How long the exit guard waits for queued finalizer jobs.
    #[serde(default = "default_exit_flush_timeout_ms")]
    pub exit_flush_timeout_ms: u64,
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_fallback_diagnostics() -> bool {
    true
}

fn default_finalizer_thread_name() -> String {
    "resource-finalizer".to_string()
}

fn default_exit_flush_timeout_ms() -> u64 {
    5_000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_diagnostics: default_fallback_diagnostics(),
            finalizer_thread_name: default_finalizer_thread_name(),
            exit_flush_timeout_ms: default_exit_flush_timeout_ms(),
            log_filter: default_log_filter(),
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ContextError> {
        serde_json::from_str(json).map_err(|e| ContextError::Config(e.to_string()))
    }

    /// Builds a configuration from `RESOURCE_CONTEXTS_*` environment
    /// variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ContextError> {
        let mut config = Self::default();

        if let Some(value) = lookup("RESOURCE_CONTEXTS_FALLBACK_DIAGNOSTICS") {
            config.fallback_diagnostics = parse_bool(&value).ok_or_else(|| {
                ContextError::Config(format!(
                    "RESOURCE_CONTEXTS_FALLBACK_DIAGNOSTICS: expected a boolean, got '{value}'"
                ))
            })?;
        }
        if let Some(value) = lookup("RESOURCE_CONTEXTS_FINALIZER_THREAD") {
            config.finalizer_thread_name = value;
        }
        if let Some(value) = lookup("RESOURCE_CONTEXTS_EXIT_FLUSH_MS") {
            config.exit_flush_timeout_ms = value.parse().map_err(|_| {
                ContextError::Config(format!(
                    "RESOURCE_CONTEXTS_EXIT_FLUSH_MS: expected milliseconds, got '{value}'"
                ))
            })?;
        }
        if let Some(value) = lookup("RESOURCE_CONTEXTS_LOG") {
            config.log_filter = value;
        }
        if let Some(value) = lookup("RESOURCE_CONTEXTS_LOG_FORMAT") {
            config.log_format = match value.to_ascii_lowercase().as_str() {
                "compact" => LogFormat::Compact,
                "json" => LogFormat::Json,
                other => {
                    return Err(ContextError::Config(format!(
                        "RESOURCE_CONTEXTS_LOG_FORMAT: unknown format '{other}'"
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Enables or disables global-fallback diagnostics.
    #[must_use]
    pub fn with_fallback_diagnostics(mut self, enabled: bool) -> Self {
        self.fallback_diagnostics = enabled;
        self
    }

    /// Sets the finalizer thread name.
    #[must_use]
    pub fn with_finalizer_thread_name(mut self, name: impl Into<String>) -> Self {
        self.finalizer_thread_name = name.into();
        self
    }

    /// Sets the exit flush timeout.
    #[must_use]
    pub fn with_exit_flush_timeout(mut self, timeout: Duration) -> Self {
        self.exit_flush_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the fallback log filter.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Sets the log format.
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Gets the exit flush timeout as Duration.
    #[must_use]
    pub fn exit_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_flush_timeout_ms)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Replaces the process-wide configuration.
///
/// The finalizer thread name is read when the worker first starts; later
/// changes to it have no effect.
pub fn set_active(config: EngineConfig) {
    *ACTIVE_CONFIG.write() = config;
}

/// Returns a copy of the process-wide configuration.
#[must_use]
pub fn active() -> EngineConfig {
    ACTIVE_CONFIG.read().clone()
}

pub(crate) fn fallback_diagnostics_enabled() -> bool {
    ACTIVE_CONFIG.read().fallback_diagnostics
}
