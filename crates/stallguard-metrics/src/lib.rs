//! Metrics collection and Prometheus exporter for stallguard.
//!
//! This module provides metrics instrumentation for connection tracking,
//! including connection counts, detected timeouts and heartbeat health.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of connections accepted.
pub const CONNECTIONS_TOTAL: &str = "stallguard_connections_total";
/// Number of currently active connections.
pub const CONNECTIONS_ACTIVE: &str = "stallguard_connections_active";
/// Number of entries in the connection registry.
pub const CONNECTIONS_TRACKED: &str = "stallguard_connections_tracked";
/// Connection duration histogram (seconds).
pub const CONNECTION_DURATION_SECONDS: &str = "stallguard_connection_duration_seconds";
/// Total number of timeouts fired, by reason.
pub const TIMEOUTS_TOTAL: &str = "stallguard_timeouts_total";
/// Total number of connections dropped without being unregistered.
pub const APPLICATION_NEVER_COMPLETED_TOTAL: &str = "stallguard_application_never_completed_total";
/// Total number of heartbeats that overran their interval.
pub const HEARTBEAT_SLOW_TOTAL: &str = "stallguard_heartbeat_slow_total";
/// Heartbeat walk duration histogram (seconds).
pub const HEARTBEAT_DURATION_SECONDS: &str = "stallguard_heartbeat_duration_seconds";
/// Total number of upgrade requests, by outcome.
pub const UPGRADES_TOTAL: &str = "stallguard_upgrades_total";
/// Number of currently upgraded connections.
pub const UPGRADED_CONNECTIONS_ACTIVE: &str = "stallguard_upgraded_connections_active";
/// Total number of shutdown phases, by phase and outcome.
pub const SHUTDOWN_PHASES_TOTAL: &str = "stallguard_shutdown_phases_total";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "stallguard_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a new connection accepted.
#[inline]
pub fn record_connection_accepted() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection closed.
#[inline]
pub fn record_connection_closed(duration_secs: f64) {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(duration_secs);
}

/// Set the number of registry entries seen by the last heartbeat.
#[inline]
pub fn set_connections_tracked(count: usize) {
    gauge!(CONNECTIONS_TRACKED).set(count as f64);
}

/// Record a fired timeout (reason: "keep_alive", "read_data_rate", ...).
#[inline]
pub fn record_timeout(reason: &'static str) {
    counter!(TIMEOUTS_TOTAL, "reason" => reason).increment(1);
}

/// Record a connection that was dropped while still registered.
#[inline]
pub fn record_application_never_completed() {
    counter!(APPLICATION_NEVER_COMPLETED_TOTAL).increment(1);
}

/// Record a heartbeat that could not keep up with its interval.
#[inline]
pub fn record_heartbeat_slow() {
    counter!(HEARTBEAT_SLOW_TOTAL).increment(1);
}

/// Record how long one heartbeat took to run all handlers.
#[inline]
pub fn record_heartbeat_duration(duration_secs: f64) {
    histogram!(HEARTBEAT_DURATION_SECONDS).record(duration_secs);
}

/// Record an upgrade request (outcome: "granted" or "rejected").
#[inline]
pub fn record_upgrade(outcome: &'static str) {
    counter!(UPGRADES_TOTAL, "outcome" => outcome).increment(1);
    if outcome == "granted" {
        gauge!(UPGRADED_CONNECTIONS_ACTIVE).increment(1.0);
    }
}

/// Record the end of an upgraded stream.
#[inline]
pub fn record_upgrade_closed() {
    gauge!(UPGRADED_CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a shutdown phase result (phase: "close" or "abort").
#[inline]
pub fn record_shutdown_phase(phase: &'static str, completed: bool) {
    let outcome = if completed { "completed" } else { "timed_out" };
    counter!(SHUTDOWN_PHASES_TOTAL, "phase" => phase, "outcome" => outcome).increment(1);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

// ============================================================================
// Error Type Constants (re-exported from stallguard-core)
// ============================================================================

pub use stallguard_core::{ERROR_ABORTED, ERROR_CONFIG, ERROR_IO, ERROR_REGISTRY, ERROR_TIMEOUT};
