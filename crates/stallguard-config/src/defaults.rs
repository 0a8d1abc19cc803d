//! Default value functions for serde deserialization.
//!
//! These functions forward to constants defined in `stallguard_core::defaults`.

use stallguard_core::defaults;

/// Generate default value functions that forward to stallguard_core::defaults constants.
macro_rules! default_fns {
    // For Copy types (integers, floats, bool, etc.)
    ($($fn_name:ident => $const_name:ident : $ty:ty),* $(,)?) => {
        $(
            pub(crate) fn $fn_name() -> $ty {
                defaults::$const_name
            }
        )*
    };
}

default_fns! {
    default_connection_backlog          => DEFAULT_CONNECTION_BACKLOG: u32,
    default_read_buffer_size            => DEFAULT_READ_BUFFER_SIZE: usize,
    min_read_buffer_size                => MIN_READ_BUFFER_SIZE: usize,
    default_keep_alive_timeout_secs     => DEFAULT_KEEP_ALIVE_TIMEOUT_SECS: u64,
    default_request_headers_timeout_secs => DEFAULT_REQUEST_HEADERS_TIMEOUT_SECS: u64,
    default_shutdown_timeout_secs       => DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64,
    heartbeat_interval_ms               => HEARTBEAT_INTERVAL_MS: u64,
}

pub(crate) fn default_request_body_rate() -> Option<crate::DataRateConfig> {
    Some(crate::DataRateConfig {
        bytes_per_second: defaults::DEFAULT_MIN_REQUEST_BODY_BYTES_PER_SEC,
        grace_period_secs: defaults::DEFAULT_MIN_REQUEST_BODY_GRACE_SECS as f64,
    })
}

pub(crate) fn default_response_rate() -> Option<crate::DataRateConfig> {
    Some(crate::DataRateConfig {
        bytes_per_second: defaults::DEFAULT_MIN_RESPONSE_BYTES_PER_SEC,
        grace_period_secs: defaults::DEFAULT_MIN_RESPONSE_GRACE_SECS as f64,
    })
}
