//! CLI Entry Point for grabber_daq
//!
//! Provides command-line interface for:
//! - Running a capture on the configured channels until Ctrl-C, a frame
//!   count, or a duration
//! - Checking a configuration file without touching the hardware
//!
//! # Usage
//!
//! ```bash
//! grabber_daq run --config config/grabber.toml --frames 300
//! grabber_daq check-config --config config/grabber.toml
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grabber_daq::capture::{build_backend, Capture, CaptureOptions};
use grabber_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use grabber_daq::driver::DriverSession;
use grabber_daq::tracing_setup;
use tracing::info;

#[derive(Parser)]
#[command(name = "grabber_daq")]
#[command(about = "Headless frame-grabber capture", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the configured channels and capture
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Stop after this many frames (all channels together)
        #[arg(long)]
        frames: Option<u64>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            frames,
            duration,
        } => {
            run_capture(
                config,
                CaptureOptions {
                    frames,
                    duration: duration.map(Duration::from_secs),
                },
            )
            .await
        }
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load_config(path: &PathBuf) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("Loading {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn run_capture(path: PathBuf, options: CaptureOptions) -> Result<()> {
    let config = load_config(&path)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(config = %path.display(), channels = config.channels.len(), "Configuration loaded");

    let api = build_backend(&config.backend)?;
    let session = DriverSession::process(move || api);

    let capture = Capture::open(&session, &config.channels, options)?;
    let summary = capture.run(options).await?;

    println!("Capture finished ({:?}): {} frame(s)", summary.reason, summary.total_frames);
    for channel in &summary.channels {
        println!(
            "  source {} [{}]: {} frame(s), {} released, {} acquisition failure(s), {} timeout(s)",
            channel.source_index,
            channel.handle,
            channel.stats.frames_dispatched,
            channel.stats.buffers_released,
            channel.stats.acquisition_failures,
            channel.stats.wait_timeouts,
        );
    }
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;

    println!("Configuration OK: {}", path.display());
    println!("  backend: {:?}", config.backend.kind);
    for (index, channel) in config.channels.iter().enumerate() {
        println!(
            "  channel #{}: source {} {}/{} (wait {:?}, stop {:?})",
            index,
            channel.source_index,
            channel.connector,
            channel.standard,
            channel.wait_timeout,
            channel.stop_timeout(),
        );
    }
    Ok(())
}
