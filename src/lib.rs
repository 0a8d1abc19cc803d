//! # stallguard
//!
//! Connection tracking with per-connection timeouts, minimum data-rate
//! enforcement and heartbeat-driven stall detection.
//!
//! ## Crates
//!
//! - [`stallguard_core`] - Shared defaults and error classification
//! - [`stallguard_conn`] - Connection registry, timeouts, heartbeat and shutdown
//! - [`stallguard_config`] - Configuration loading and validation
//! - [`stallguard_metrics`] - Prometheus-compatible metrics
//! - [`stallguard_server`] - Line echo server built on the core

pub use stallguard_config as config;
pub use stallguard_conn as conn;
pub use stallguard_core as core;
pub use stallguard_metrics as metrics;
pub use stallguard_server as server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use stallguard_config::{Config, load_config, validate_config};
    pub use stallguard_conn::{
        ConnectionManager, Heartbeat, HeartbeatManager, MinDataRate, ResourceCounter,
        TimeoutControl, TimeoutReason,
    };
    pub use stallguard_server::{CancellationToken, ServerError, run, run_with_shutdown};
}
