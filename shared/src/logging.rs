//! Process-wide `tracing` setup for hosts that do not install their own.
//!
//! `RUST_LOG` takes precedence over the filter passed by the host.

use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "safety_core=info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Installs a compact `fmt` subscriber behind an `EnvFilter`.
///
/// # Errors
///
/// Fails if `default_filter` does not parse or if a global subscriber is
/// already set (for example by the host app or a previous call).
pub fn init_logging(default_filter: &str) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
