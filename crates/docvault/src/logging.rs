//! Subscriber setup for binaries and tests embedding the engine.
//!
//! Library code logs through `log` (persistence layer) and `tracing`
//! (orchestrators). [`init`] routes both into one `tracing-subscriber` stack.

use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::{DocvaultError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global subscriber. The filter comes from `RUST_LOG`, falling
/// back to `default_directive` (for example `"info"` or `"docvault=debug"`).
///
/// Fails if a global subscriber or `log` logger is already set.
pub fn init(format: LogFormat, default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| DocvaultError::Logging(e.to_string()))?;

    LogTracer::init().map_err(|e| DocvaultError::Logging(e.to_string()))?;

    let registry = Registry::default().with(filter);
    let result = match format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(true).with_thread_names(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    result.map_err(|e| DocvaultError::Logging(e.to_string()))
}
