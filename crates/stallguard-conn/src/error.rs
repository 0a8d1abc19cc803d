//! Error types for the connection-tracking core.
//!
//! Every variant is a caller contract violation; detected timeouts are not
//! errors and are reported through [`crate::TimeoutHandler`] instead.

use std::time::Duration;

/// Connection registry error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection id {0} is already registered")]
    DuplicateId(u64),
    #[error("connection id {0} is not registered")]
    UnknownId(u64),
}

/// Invalid minimum data rate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataRateError {
    #[error("bytes per second must be a non-negative number, got {0}")]
    InvalidBytesPerSecond(f64),
    #[error("grace period must be at least {min:?}, got {actual:?}")]
    GracePeriodTooShort { min: Duration, actual: Duration },
}

/// Misuse of the connection timeout feature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutFeatureError {
    #[error("timeout must be a non-negative span, got {0:?}")]
    NegativeTimeout(chrono::TimeDelta),
    #[error("concurrent timeouts are not supported; cancel the active timeout first")]
    ConcurrentTimeouts,
}

/// Why a connection was torn down without finishing its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionAborted {
    #[error("the connection was aborted because the server is shutting down")]
    ServerShutdown,
    #[error("the connection timed out ({0})")]
    TimedOut(crate::timeout_control::TimeoutReason),
}
