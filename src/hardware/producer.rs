//! Sampling producer process.
//!
//! Runs as `motion_daq producer …`, spawned by the consumer's supervisor. Polls the
//! sensor source, decimates each channel with its own counter and writes the kept
//! samples into the shared rings. Exits on SIGTERM (default disposition) or when
//! the consumer unlinks the accelerometer ring.

use clap::Args;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{open_source, parse_imu_report, SensorChannel};
use crate::error::AppResult;
use crate::transport::decimator::SampleDecimator;
use crate::transport::ring::RingBuffer;

const POLL_TIMEOUT: Duration = Duration::from_millis(5);
const ORPHAN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Command line of the hidden `producer` subcommand.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct ProducerArgs {
    /// Accelerometer ring file (must already exist)
    #[arg(long)]
    pub accel_ring: PathBuf,
    /// Optional gyroscope ring file
    #[arg(long)]
    pub gyro_ring: Option<PathBuf>,
    /// Restart counter recorded in the ring header
    #[arg(long, default_value_t = 0)]
    pub restart_count: u32,
    /// Keep one sample in N per channel
    #[arg(long, default_value_t = 8)]
    pub decimate: u32,
    /// Sensor source selector
    #[arg(long, default_value = "mock")]
    pub source: String,
    /// Native sensor rate in Hz
    #[arg(long, default_value_t = 800.0)]
    pub native_rate: f64,
    /// Seed for simulated sources
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl ProducerArgs {
    /// Render back into command-line arguments, subcommand name first.
    pub fn to_command_line(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "producer".into(),
            "--accel-ring".into(),
            self.accel_ring.clone().into(),
        ];
        if let Some(gyro) = &self.gyro_ring {
            args.push("--gyro-ring".into());
            args.push(gyro.clone().into());
        }
        for (flag, value) in [
            ("--restart-count", self.restart_count.to_string()),
            ("--decimate", self.decimate.to_string()),
            ("--source", self.source.clone()),
            ("--native-rate", self.native_rate.to_string()),
            ("--seed", self.seed.to_string()),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        args
    }
}

/// Run the producer until the process is terminated or the ring is unlinked.
pub fn run(args: &ProducerArgs) -> AppResult<()> {
    let stop = AtomicBool::new(false);
    run_until(args, &stop)
}

/// Run the producer until `stop` is set, the process is terminated, or the ring is unlinked.
pub fn run_until(args: &ProducerArgs, stop: &AtomicBool) -> AppResult<()> {
    let accel = RingBuffer::open(&args.accel_ring)?;
    accel.set_restart_count(args.restart_count);
    let gyro = args
        .gyro_ring
        .as_deref()
        .map(RingBuffer::open)
        .transpose()?;

    let seed = args.seed.wrapping_add(u64::from(args.restart_count));
    let mut source = open_source(&args.source, args.native_rate, seed)?;
    source.open()?;

    info!(
        source = %args.source,
        restart_count = args.restart_count,
        decimate = args.decimate,
        gyro = gyro.is_some(),
        "Producer started"
    );

    let mut accel_decimator = SampleDecimator::new(args.decimate);
    let mut gyro_decimator = SampleDecimator::new(args.decimate);
    let mut malformed = 0u64;
    let mut last_check = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        let reports = match source.poll(POLL_TIMEOUT) {
            Ok(reports) => reports,
            Err(err) => {
                source.close();
                return Err(err);
            }
        };

        for report in reports {
            let Some(sample) = parse_imu_report(&report.bytes) else {
                malformed += 1;
                continue;
            };
            match report.channel {
                SensorChannel::Accelerometer => {
                    if accel_decimator.accept() {
                        accel.write(sample);
                    }
                }
                SensorChannel::Gyroscope => {
                    if let Some(ring) = &gyro {
                        if gyro_decimator.accept() {
                            ring.write(sample);
                        }
                    }
                }
            }
        }

        if last_check.elapsed() >= ORPHAN_CHECK_INTERVAL {
            last_check = Instant::now();
            if malformed > 0 {
                debug!(malformed, "Skipped malformed reports");
                malformed = 0;
            }
            if !args.accel_ring.exists() {
                warn!(path = ?args.accel_ring, "Ring file removed, producer exiting");
                break;
            }
        }
    }

    source.close();
    info!(total = accel.total_written(), "Producer stopped");
    Ok(())
}
