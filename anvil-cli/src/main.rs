// anvil-cli/src/main.rs
// ============================================================================
// Module: Anvil CLI Entry Point
// Description: Command dispatcher for the Anvil provisioning server.
// Purpose: Load configuration, initialize tracing, and run the server.
// Dependencies: anvil-config, anvil-server, clap, tokio, tracing
// ============================================================================

//! ## Overview
//! The CLI is deliberately small: `anvil serve` loads the configuration
//! (explicit path, `ANVIL_CONFIG`, or `anvil.toml`), initializes leveled
//! logging, and hands control to the server.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;

use anvil_config::AnvilConfig;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Bare-metal provisioning control plane.
#[derive(Debug, Parser)]
#[command(name = "anvil", version, about = "Anvil provisioning server")]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the provisioning server.
    Serve {
        /// Path to the configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// CLI failures surfaced before exit.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failed to load or validate.
    #[error("{0}")]
    Config(String),
    /// The server failed.
    #[error("{0}")]
    Server(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Process entry point.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve {
            config,
        } => run_serve(config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "anvil exited with an error");
            ExitCode::FAILURE
        }
    }
}

/// Initializes leveled logging with `RUST_LOG` override support.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Loads configuration and runs the server until it exits.
async fn run_serve(config_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = AnvilConfig::load(config_path.as_deref())
        .map_err(|err| CliError::Config(err.to_string()))?;
    anvil_server::serve(config).await.map_err(|err| CliError::Server(err.to_string()))
}
