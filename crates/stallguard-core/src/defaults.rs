//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Heartbeat
// ============================================================================

/// Interval between two heartbeat ticks in milliseconds.
///
/// Every armed timeout is padded by one interval because it may be armed
/// right before the next tick.
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default keep-alive timeout between two requests in seconds.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_SECS: u64 = 130;
/// Default time allowed to receive a complete request line in seconds.
pub const DEFAULT_REQUEST_HEADERS_TIMEOUT_SECS: u64 = 30;
/// Time a closing connection gets to finish a partially received line, in seconds.
pub const DEFAULT_REQUEST_DRAIN_TIMEOUT_SECS: u64 = 5;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// Upper bound for the forced-abort phase of shutdown in milliseconds.
pub const ABORT_ALL_CONNECTIONS_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Data Rate Defaults
// ============================================================================

/// Default minimum request body data rate (bytes per second).
pub const DEFAULT_MIN_REQUEST_BODY_BYTES_PER_SEC: f64 = 240.0;
/// Default grace period before the request body data rate is enforced.
pub const DEFAULT_MIN_REQUEST_BODY_GRACE_SECS: u64 = 5;
/// Default minimum response data rate (bytes per second).
pub const DEFAULT_MIN_RESPONSE_BYTES_PER_SEC: f64 = 240.0;
/// Default grace period before the response data rate is enforced.
pub const DEFAULT_MIN_RESPONSE_GRACE_SECS: u64 = 5;

// ============================================================================
// Connection Defaults
// ============================================================================

/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;
/// Default per-connection read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
/// Smallest accepted read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 64;

// ============================================================================
// Logging Defaults
// ============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
