//! stallguard server library.
//!
//! A line echo server whose connections are tracked, timed and shut down by
//! `stallguard-conn`. Exposed as a library for integration tests and the
//! unified CLI.

pub mod cli;
mod connection;
mod error;
mod server;
mod state;
mod util;

pub use cli::ServerArgs;
pub use connection::{MAX_LINE_BYTES, TcpConnection};
pub use error::ServerError;
pub use server::{run, run_with_shutdown};
pub use state::{Limits, ServerState};
pub use tokio_util::sync::CancellationToken;
