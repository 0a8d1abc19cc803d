//! Core constants shared across stallguard crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type constants for metrics/logging
//! - The project version

pub mod defaults;
pub mod errors;

use std::time::Duration;

// Re-export commonly used items at crate root
pub use defaults::*;
pub use errors::*;

/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Heartbeat interval as a [`Duration`].
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(HEARTBEAT_INTERVAL_MS);
