//! Diagnostic events emitted by the connection-tracking core.
//!
//! The trace collaborator is constructed by the server and passed down to
//! every component that reports, so its lifetime follows the server's.

use std::time::Duration;

use stallguard_metrics::{
    record_application_never_completed, record_heartbeat_slow, record_shutdown_phase,
    record_timeout,
};
use tracing::{debug, info, warn};

use crate::clock::Timestamp;
use crate::timeout_control::TimeoutReason;

pub trait ConnectionTrace: Send + Sync {
    /// A registered connection was dropped without being removed.
    fn application_never_completed(&self, connection_id: &str);

    /// A heartbeat took `duration` against an `interval` budget, or started
    /// while the previous one was still running.
    fn heartbeat_slow(&self, duration: Duration, interval: Duration, now: Timestamp);

    fn connection_timed_out(&self, connection_id: &str, reason: TimeoutReason);

    fn request_body_minimum_data_rate_not_satisfied(&self, connection_id: &str, rate: f64);

    fn response_minimum_data_rate_not_satisfied(&self, connection_id: &str);

    fn not_all_connections_closed_gracefully(&self);

    fn not_all_connections_aborted(&self);
}

/// [`ConnectionTrace`] backed by `tracing` events and Prometheus counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTrace;

impl ConnectionTrace for TracingTrace {
    fn application_never_completed(&self, connection_id: &str) {
        record_application_never_completed();
        warn!(
            connection_id,
            "connection was dropped while still registered; the application never completed"
        );
    }

    fn heartbeat_slow(&self, duration: Duration, interval: Duration, now: Timestamp) {
        record_heartbeat_slow();
        warn!(
            duration_ms = duration.as_millis() as u64,
            interval_ms = interval.as_millis() as u64,
            now_ns = now.as_nanos(),
            "heartbeat took longer than its interval; timeouts may fire late"
        );
    }

    fn connection_timed_out(&self, connection_id: &str, reason: TimeoutReason) {
        record_timeout(reason.as_str());
        debug!(connection_id, reason = reason.as_str(), "connection timed out");
    }

    fn request_body_minimum_data_rate_not_satisfied(&self, connection_id: &str, rate: f64) {
        info!(
            connection_id,
            rate, "request data rate fell below the configured minimum"
        );
    }

    fn response_minimum_data_rate_not_satisfied(&self, connection_id: &str) {
        info!(
            connection_id,
            "response data rate fell below the configured minimum"
        );
    }

    fn not_all_connections_closed_gracefully(&self) {
        record_shutdown_phase("close", false);
        info!("some connections failed to close gracefully during server shutdown");
    }

    fn not_all_connections_aborted(&self) {
        record_shutdown_phase("abort", false);
        warn!("some connections failed to abort during server shutdown");
    }
}
