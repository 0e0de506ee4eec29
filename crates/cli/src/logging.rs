//! Structured logging setup.
//!
//! All log output goes to stderr through `tracing`. Field names used
//! across the crates: `certificate_id`, `reference_no`, `machine`, `status`,
//! `token` (always the redacted prefix, never the full bearer token).

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LogError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|_| LogError::InvalidLevel(config.level.clone()))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}
