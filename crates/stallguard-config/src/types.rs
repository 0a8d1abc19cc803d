//! Configuration type definitions for server, limits, shutdown, metrics, and logging.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    /// TCP listener backlog (pending connections queue size).
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
    /// Per-connection read buffer size in bytes.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Per-connection limits enforced by the heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Idle time allowed between two requests.
    #[serde(default = "default_keep_alive_timeout_secs")]
    pub keep_alive_timeout_secs: u64,
    /// Time allowed to receive a full request line when no request data
    /// rate is configured.
    #[serde(default = "default_request_headers_timeout_secs")]
    pub request_headers_timeout_secs: u64,
    /// Maximum concurrently upgraded connections (None = unlimited).
    #[serde(default)]
    pub max_upgraded_connections: Option<u64>,
    /// Minimum inbound data rate (None = not enforced).
    #[serde(default = "default_request_body_rate")]
    pub min_request_body_data_rate: Option<DataRateConfig>,
    /// Minimum outbound data rate (None = not enforced).
    #[serde(default = "default_response_rate")]
    pub min_response_data_rate: Option<DataRateConfig>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            keep_alive_timeout_secs: default_keep_alive_timeout_secs(),
            request_headers_timeout_secs: default_request_headers_timeout_secs(),
            max_upgraded_connections: None,
            min_request_body_data_rate: default_request_body_rate(),
            min_response_data_rate: default_response_rate(),
        }
    }
}

impl LimitsConfig {
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    pub fn request_headers_timeout(&self) -> Duration {
        Duration::from_secs(self.request_headers_timeout_secs)
    }
}

/// A minimum data rate: bytes per second, enforced after a grace period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRateConfig {
    pub bytes_per_second: f64,
    pub grace_period_secs: f64,
}

impl DataRateConfig {
    /// Saturates at [`Duration::MAX`]; `validate_config` rejects values
    /// that do not fit.
    pub fn grace_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.grace_period_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Time granted to connections to close gracefully before they are aborted.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    /// Prometheus exporter listen address (None = disabled).
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"stallguard_conn": "debug"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}
