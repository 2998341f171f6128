// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use rtp_camera::constants::app_info;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "rtp-camera")]
#[command(about = "Camera capture into a hardware H.264 encoder")]
#[command(version = app_info::version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// List hardware H.264 encoders
    Encoders,

    /// Capture and encode until stopped
    Stream {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Write the stream as Annex-B H.264 (default: ~/Videos/rtp-camera/stream_TIMESTAMP.h264)
        #[arg(long, value_name = "FILE", num_args = 0..=1)]
        dump: Option<Option<PathBuf>>,

        /// Save the last preview image as PNG when stopping
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },

    /// Print the decoder bootstrap format
    Bootstrap,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control log level, e.g. RUST_LOG=rtp_camera=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    tracing::info!(
        version = app_info::version(),
        environment = app_info::runtime_environment(),
        "Starting rtp-camera"
    );

    match cli.command {
        Commands::List => cli::list_cameras(),
        Commands::Encoders => cli::list_encoders(),
        Commands::Stream {
            duration,
            dump,
            snapshot,
        } => cli::stream(duration, dump, snapshot),
        Commands::Bootstrap => cli::print_bootstrap(),
    }
}
