//! Server state shared across connections.

use std::sync::Arc;
use std::time::Duration;

use stallguard_config::{Config, DataRateConfig};
use stallguard_conn::{
    ConnectionManager, ConnectionTrace, Debugger, HeartbeatManager, MinDataRate,
};
use stallguard_core::DEFAULT_REQUEST_DRAIN_TIMEOUT_SECS;

use crate::connection::TcpConnection;
use crate::error::ServerError;

/// Per-connection limits resolved from configuration.
#[derive(Debug, Clone)]
pub struct Limits {
    pub keep_alive_timeout: Duration,
    pub request_headers_timeout: Duration,
    /// Bounds how long a closing connection waits for the rest of a line.
    pub request_drain_timeout: Duration,
    /// `None` times request lines with `request_headers_timeout` instead.
    pub min_request_rate: Option<MinDataRate>,
    pub min_response_rate: Option<MinDataRate>,
    pub read_buffer_size: usize,
}

impl Limits {
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        Ok(Self {
            keep_alive_timeout: config.limits.keep_alive_timeout(),
            request_headers_timeout: config.limits.request_headers_timeout(),
            request_drain_timeout: Duration::from_secs(DEFAULT_REQUEST_DRAIN_TIMEOUT_SECS),
            min_request_rate: to_min_rate(config.limits.min_request_body_data_rate)?,
            min_response_rate: to_min_rate(config.limits.min_response_data_rate)?,
            read_buffer_size: config.server.read_buffer_size,
        })
    }
}

fn to_min_rate(rate: Option<DataRateConfig>) -> Result<Option<MinDataRate>, ServerError> {
    rate.map(|r| MinDataRate::new(r.bytes_per_second, r.grace_period()))
        .transpose()
        .map_err(ServerError::from)
}

/// Shared server state for all connections.
#[derive(Clone)]
pub struct ServerState {
    pub limits: Limits,
    pub connections: Arc<ConnectionManager<TcpConnection>>,
    /// Timestamp source for new connections; reads the last heartbeat.
    pub heartbeat: Arc<HeartbeatManager<TcpConnection>>,
    pub trace: Arc<dyn ConnectionTrace>,
    pub debugger: Arc<dyn Debugger>,
}
