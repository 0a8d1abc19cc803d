//! Unified stallguard CLI.
//!
//! This binary provides a unified interface to all stallguard components:
//! - `stallguard server` - Run the line echo server
//! - `stallguard check-config` - Load and validate a config file
//!
//! The server can also be run as a standalone binary.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// stallguard unified CLI.
#[derive(Parser)]
#[command(
    name = "stallguard",
    version,
    about = "Connection timeouts and heartbeat-driven stall detection",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the line echo server.
    #[command(name = "server", alias = "serve")]
    Server(Box<stallguard_server::ServerArgs>),

    /// Load, apply overrides to and validate a config file, then print it.
    #[command(name = "check-config")]
    CheckConfig {
        /// Config file path (json/jsonc/yaml/toml)
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,

        #[command(flatten)]
        overrides: stallguard_config::CliOverrides,
    },
}

fn check_config(
    path: &Path,
    overrides: &stallguard_config::CliOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = stallguard_config::load_config(path)?;
    stallguard_config::apply_overrides(&mut config, overrides);
    stallguard_config::validate_config(&config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server(args) => stallguard_server::cli::run(*args).await,
        Commands::CheckConfig { config, overrides } => check_config(&config, &overrides),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
