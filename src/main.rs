// SPDX-License-Identifier: GPL-3.0-only

use camera_capture::{CameraBackendType, Config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-capture")]
#[command(about = "Capture frames from the back-facing camera")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Camera backend to use (overrides the config file)
    #[arg(long, global = true)]
    backend: Option<CameraBackendType>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Stream preview frames and print frame statistics
    Preview {
        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<u64>,

        /// Stop after this many seconds
        #[arg(short, long, default_value_t = camera_capture::constants::timing::CLI_DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Save one preview frame as PNG
    Snapshot {
        /// Output file path (default: ~/Pictures/Camera/snapshot_TIMESTAMP.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Scan QR codes until an otpauth URL is stored
    Scan {
        /// Give up after this many seconds
        #[arg(short, long, default_value_t = camera_capture::constants::timing::CLI_DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Manage the stored otpauth URLs
    Codes {
        #[command(subcommand)]
        action: CodesAction,
    },
}

#[derive(Subcommand)]
enum CodesAction {
    /// Print stored URLs
    List,
    /// Append a URL
    Add { url: String },
    /// Remove a URL
    Remove { url: String },
    /// Replace a URL (the replacement moves to the end)
    Edit { old: String, new: String },
    /// Exchange the positions of two URLs
    Swap { first: String, second: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Ignoring unreadable config: {}", e);
        Config::default()
    });
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    // Initialize logging
    // RUST_LOG takes precedence over the configured filter
    // Examples: RUST_LOG=debug, RUST_LOG=camera_capture=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_filter))
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(
                        camera_capture::constants::pipeline::DEFAULT_LOG_FILTER,
                    )
                }),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::List => cli::list_cameras(&config)?,
        Commands::Preview { frames, timeout } => cli::preview(&config, frames, timeout).await?,
        Commands::Snapshot { output } => cli::snapshot(&config, output).await?,
        Commands::Scan { timeout } => cli::scan(&config, timeout).await?,
        Commands::Codes { action } => match action {
            CodesAction::List => cli::codes_list(&config)?,
            CodesAction::Add { url } => cli::codes_add(&config, &url)?,
            CodesAction::Remove { url } => cli::codes_remove(&config, &url)?,
            CodesAction::Edit { old, new } => cli::codes_edit(&config, &old, &new)?,
            CodesAction::Swap { first, second } => cli::codes_swap(&config, &first, &second)?,
        },
    }

    Ok(())
}
