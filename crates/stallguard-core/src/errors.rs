//! Error type constants for metrics and logging.
//!
//! These constants provide consistent error classification across all crates.

/// I/O error.
pub const ERROR_IO: &str = "io";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
/// Timeout detected by the heartbeat.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Connection registry contract violation (duplicate or unknown id).
pub const ERROR_REGISTRY: &str = "registry";
/// Connection aborted by the server.
pub const ERROR_ABORTED: &str = "aborted";
