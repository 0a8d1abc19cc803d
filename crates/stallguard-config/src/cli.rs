//! CLI override definitions and application logic.

use clap::Parser;

use crate::Config;
use crate::defaults::*;
use crate::types::*;

#[derive(Debug, Clone, Parser, Default)]
pub struct CliOverrides {
    /// Override server listen address, e.g. 0.0.0.0:7000
    #[arg(long)]
    pub listen: Option<String>,
    /// TCP listener backlog size
    #[arg(long)]
    pub connection_backlog: Option<u32>,
    /// Per-connection read buffer size (bytes)
    #[arg(long)]
    pub read_buffer_size: Option<usize>,
    /// Override keep-alive timeout (seconds)
    #[arg(long)]
    pub keep_alive_timeout_secs: Option<u64>,
    /// Override request line timeout (seconds)
    #[arg(long)]
    pub request_headers_timeout_secs: Option<u64>,
    /// Maximum concurrently upgraded connections (0 = unlimited)
    #[arg(long)]
    pub max_upgraded_connections: Option<u64>,
    /// Minimum request data rate in bytes/sec (0 = disabled)
    #[arg(long)]
    pub min_request_rate: Option<f64>,
    /// Minimum response data rate in bytes/sec (0 = disabled)
    #[arg(long)]
    pub min_response_rate: Option<f64>,
    /// Graceful shutdown timeout (seconds)
    #[arg(long)]
    pub shutdown_timeout_secs: Option<u64>,
    /// Override metrics listen address
    #[arg(long)]
    pub metrics_listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Override log format (json/pretty/compact)
    #[arg(long)]
    pub log_format: Option<String>,
}

pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) {
    if let Some(v) = &overrides.listen {
        config.server.listen = v.clone();
    }
    if let Some(v) = overrides.connection_backlog {
        config.server.connection_backlog = v;
    }
    if let Some(v) = overrides.read_buffer_size {
        config.server.read_buffer_size = v;
    }
    if let Some(v) = overrides.keep_alive_timeout_secs {
        config.limits.keep_alive_timeout_secs = v;
    }
    if let Some(v) = overrides.request_headers_timeout_secs {
        config.limits.request_headers_timeout_secs = v;
    }
    if let Some(v) = overrides.max_upgraded_connections {
        config.limits.max_upgraded_connections = if v == 0 { None } else { Some(v) };
    }
    // Data rates: 0 disables, > 0 enables with that rate
    if let Some(rate) = overrides.min_request_rate {
        apply_rate(
            &mut config.limits.min_request_body_data_rate,
            rate,
            default_request_body_rate,
        );
    }
    if let Some(rate) = overrides.min_response_rate {
        apply_rate(
            &mut config.limits.min_response_data_rate,
            rate,
            default_response_rate,
        );
    }
    if let Some(v) = overrides.shutdown_timeout_secs {
        config.shutdown.timeout_secs = v;
    }
    if let Some(v) = &overrides.metrics_listen {
        config.metrics.listen = Some(v.clone());
    }
    if let Some(v) = &overrides.log_level {
        config.logging.level = Some(v.clone());
    }
    if let Some(v) = &overrides.log_format {
        config.logging.format = Some(v.clone());
    }
}

fn apply_rate(
    slot: &mut Option<DataRateConfig>,
    bytes_per_second: f64,
    default: fn() -> Option<DataRateConfig>,
) {
    if bytes_per_second == 0.0 {
        *slot = None;
        return;
    }
    if slot.is_none() {
        *slot = default();
    }
    if let Some(rate) = slot.as_mut() {
        rate.bytes_per_second = bytes_per_second;
    }
}
