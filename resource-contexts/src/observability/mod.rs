//! Logging setup.
//!
//! The engine itself only emits `tracing` events. Binaries that want them
//! printed call [`init_tracing`] once at startup.

use crate::config::{EngineConfig, LogFormat};
use crate::errors::ContextError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global tracing subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `config.log_filter`. Fails if the
/// filter is invalid or a global subscriber is already installed.
pub fn init_tracing(config: &EngineConfig) -> Result<(), ContextError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .compact()
                    .with_thread_names(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_thread_names(true),
            )
            .try_init(),
    };

    result.map_err(|e| ContextError::Config(format!("failed to install tracing subscriber: {e}")))
}

fn build_filter(config: &EngineConfig) -> Result<EnvFilter, ContextError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .map_err(|e| ContextError::Config(format!("invalid log filter '{}': {e}", config.log_filter)))
}
