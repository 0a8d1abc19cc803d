//! Server error types.

use stallguard_conn::{ConnectionAborted, ConnectionError, DataRateError};
use stallguard_metrics::{ERROR_ABORTED, ERROR_CONFIG, ERROR_IO, ERROR_REGISTRY, ERROR_TIMEOUT};

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("data rate: {0}")]
    DataRate(#[from] DataRateError),
    #[error("registry: {0}")]
    Registry(#[from] ConnectionError),
    #[error("aborted: {0}")]
    Aborted(ConnectionAborted),
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}

impl ServerError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Io(_) | ServerError::LineTooLong(_) => ERROR_IO,
            ServerError::Config(_) | ServerError::DataRate(_) => ERROR_CONFIG,
            ServerError::Registry(_) => ERROR_REGISTRY,
            ServerError::Aborted(ConnectionAborted::TimedOut(_)) => ERROR_TIMEOUT,
            ServerError::Aborted(ConnectionAborted::ServerShutdown) => ERROR_ABORTED,
        }
    }
}
