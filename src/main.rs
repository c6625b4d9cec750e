//! CLI entry point for motion_daq
//!
//! ```bash
//! motion_daq detect                      # live vibration detection
//! motion_daq stream --rate 400 --axis z  # MSIG1 float32 on stdout
//! motion_daq orientation --json          # Mahony attitude frames
//! motion_daq resample --rate 8000 < in.msig > out.msig
//! ```
//!
//! `producer` is an internal subcommand: the consumer re-executes this binary
//! with it to run the sampling process.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use motion_daq::config::{MotionConfig, DEFAULT_CONFIG_PATH};
use motion_daq::error::AppResult;
use motion_daq::hardware::producer::{self, ProducerArgs};
use motion_daq::logging;
use motion_daq::runner::detect::{self, DetectArgs};
use motion_daq::runner::orientation::{self, OrientationArgs};
use motion_daq::runner::resample::{self, ResampleArgs};
use motion_daq::runner::stream::{self, StreamArgs};
use motion_daq::runner::{shutdown_signal, RunContext};

#[derive(Parser)]
#[command(name = "motion_daq", version)]
#[command(about = "Shared-memory motion sensing: vibration detection, orientation and signal streams", long_about = None)]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect vibrations, shocks and periodic motion
    Detect(DetectArgs),

    /// Stream one accelerometer axis as MSIG1 float32
    Stream(StreamArgs),

    /// Estimate orientation and emit JSON frames or a tone
    Orientation(OrientationArgs),

    /// Resample an MSIG1 stream from stdin to stdout
    Resample(ResampleArgs),

    /// Sampling process (spawned internally)
    #[command(hide = true)]
    Producer(ProducerArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_broken_pipe() => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("motion_daq: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: Cli) -> AppResult<()> {
    let config = MotionConfig::load_from(&cli.config)?;
    config.validate()?;
    logging::init_from_config(&config)?;

    if let Commands::Producer(args) = &cli.command {
        return producer::run(args);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(dispatch(cli.command, config))
}

async fn dispatch(command: Commands, config: MotionConfig) -> AppResult<()> {
    match command {
        Commands::Detect(args) => {
            let ctx = RunContext::new(config)?;
            let summary = detect::run(&ctx, &args, shutdown_signal()).await?;
            info!(
                samples = summary.total_samples,
                events = summary.events,
                restarts = summary.restarts,
                log = ?summary.log_path,
                "Detection finished"
            );
        }
        Commands::Stream(args) => {
            let ctx = RunContext::new(config)?;
            let written = stream::run(&ctx, &args, shutdown_signal()).await?;
            info!(samples = written, "Stream finished");
        }
        Commands::Orientation(args) => {
            let ctx = RunContext::new(config)?;
            orientation::run(&ctx, &args, shutdown_signal()).await?;
        }
        Commands::Resample(args) => {
            let written = tokio::select! {
                result = resample::run(&args) => result?,
                _ = shutdown_signal() => 0,
            };
            info!(samples = written, "Resample finished");
        }
        Commands::Producer(args) => producer::run(&args)?,
    }
    Ok(())
}
