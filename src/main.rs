// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use realsense_streaming::constants::app_info;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "rs-streaming")]
#[command(about = "Multi-device depth camera streaming service")]
#[command(version = app_info::version())]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the number of simulated devices
    #[arg(long, global = true)]
    devices: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available streams
    List {
        /// Print the stream descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stream and report frame counts
    Stream {
        /// Stream path such as SIM0000:IR_L (repeatable; default: all streams)
        #[arg(short, long = "stream")]
        streams: Vec<String>,

        /// Streaming duration in seconds
        #[arg(short = 't', long, default_value = "5")]
        seconds: u64,

        /// Manual exposure to apply once streaming
        #[arg(short, long, allow_negative_numbers = true)]
        exposure: Option<i32>,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=realsense_streaming=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let options = cli::CommonOptions {
        config_path: cli.config,
        devices: cli.devices,
    };

    match cli.command {
        Commands::List { json } => cli::list_streams(&options, json),
        Commands::Stream {
            streams,
            seconds,
            exposure,
        } => cli::stream(&options, &streams, seconds, exposure),
        Commands::Config { write } => cli::show_config(&options, write),
    }
}
