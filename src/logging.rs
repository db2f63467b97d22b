//! Installs the global `tracing` subscriber.

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to parse log level {level}: {source}")]
    ParseLevel {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
}

/// Logs go to stderr so stdout stays clean for listings. `RUST_LOG` wins over
/// the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let directive = config.level.as_filter_directive();
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directive).map_err(|source| LoggingError::ParseLevel {
            level: directive.to_string(),
            source,
        })?,
    };

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(LoggingError::SubscriberInstall)
}
