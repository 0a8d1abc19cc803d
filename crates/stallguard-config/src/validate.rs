//! Configuration validation logic.

use std::time::Duration;

use crate::defaults::{heartbeat_interval_ms, min_read_buffer_size};
use crate::loader::ConfigError;
use crate::{Config, DataRateConfig};

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Validation("server.listen is empty".into()));
    }
    if config.server.connection_backlog == 0 {
        return Err(ConfigError::Validation(
            "server.connection_backlog must be > 0".into(),
        ));
    }
    if config.server.read_buffer_size < min_read_buffer_size() {
        return Err(ConfigError::Validation(format!(
            "server.read_buffer_size too small (min {})",
            min_read_buffer_size()
        )));
    }
    if config.limits.keep_alive_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "limits.keep_alive_timeout_secs must be > 0".into(),
        ));
    }
    if config.limits.request_headers_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "limits.request_headers_timeout_secs must be > 0".into(),
        ));
    }
    if config.limits.max_upgraded_connections == Some(0) {
        return Err(ConfigError::Validation(
            "limits.max_upgraded_connections must be > 0 (omit for unlimited)".into(),
        ));
    }
    if let Some(ref rate) = config.limits.min_request_body_data_rate {
        validate_rate("limits.min_request_body_data_rate", rate)?;
    }
    if let Some(ref rate) = config.limits.min_response_data_rate {
        validate_rate("limits.min_response_data_rate", rate)?;
    }
    if config.shutdown.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "shutdown.timeout_secs must be > 0".into(),
        ));
    }
    if let Some(ref format) = config.logging.format
        && !["json", "pretty", "compact"].contains(&format.as_str())
    {
        return Err(ConfigError::Validation(
            "logging.format must be one of: json, pretty, compact".into(),
        ));
    }
    Ok(())
}

fn validate_rate(name: &str, rate: &DataRateConfig) -> Result<(), ConfigError> {
    if !rate.bytes_per_second.is_finite() || rate.bytes_per_second < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{name}.bytes_per_second must be a non-negative number"
        )));
    }
    // The grace period has to cover at least one heartbeat tick.
    let min_grace_secs = heartbeat_interval_ms() as f64 / 1000.0;
    if !rate.grace_period_secs.is_finite() || rate.grace_period_secs < min_grace_secs {
        return Err(ConfigError::Validation(format!(
            "{name}.grace_period_secs must be >= {min_grace_secs}"
        )));
    }
    if Duration::try_from_secs_f64(rate.grace_period_secs).is_err() {
        return Err(ConfigError::Validation(format!(
            "{name}.grace_period_secs is too large"
        )));
    }
    Ok(())
}
