//! Consumer-side command loops.
//!
//! Each command owns an [`Acquisition`] (the producer supervisor plus read
//! cursors), polls it on a fixed `tokio::time::interval`, and stops when the
//! shutdown future it was given resolves. The binary passes
//! [`shutdown_signal`]; tests pass a timer.

pub mod detect;
pub mod orientation;
pub mod resample;
pub mod stream;

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::config::MotionConfig;
use crate::error::AppResult;
use crate::transport::ring::ReadCursor;
use crate::transport::supervisor::{
    current_program, ProducerStatus, ProducerSupervisor, RestartPolicy, SupervisorConfig,
};

/// Loaded configuration plus the executable hosting the producer subcommand.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Loaded and validated configuration
    pub config: MotionConfig,
    /// Executable started as `<program> producer ...`
    pub program: PathBuf,
}

impl RunContext {
    /// Context that spawns producers from the running executable.
    pub fn new(config: MotionConfig) -> AppResult<Self> {
        Ok(Self {
            config,
            program: current_program()?,
        })
    }

    /// Context that spawns producers from `program`.
    pub fn with_program(config: MotionConfig, program: impl Into<PathBuf>) -> Self {
        Self {
            config,
            program: program.into(),
        }
    }

    /// Interval ticking at the configured poll cadence, skipping missed ticks.
    pub fn poll_interval(&self) -> Interval {
        let mut ticker = interval(Duration::from_millis(
            self.config.transport.poll_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}

/// A running producer and the consumer's cursors on its rings.
#[derive(Debug)]
pub struct Acquisition {
    supervisor: ProducerSupervisor,
    accel: ReadCursor,
    gyro: ReadCursor,
    max_batch: usize,
}

impl Acquisition {
    /// Create the rings and spawn the producer.
    pub fn start(
        ctx: &RunContext,
        decimate: u32,
        with_gyro: bool,
        policy: RestartPolicy,
    ) -> AppResult<Self> {
        let config = SupervisorConfig::from_config(
            &ctx.config,
            ctx.program.clone(),
            decimate,
            with_gyro,
            policy,
        );
        let supervisor = ProducerSupervisor::start(config)?;
        info!(
            accel_ring = ?supervisor.accel().path(),
            decimate,
            with_gyro,
            "Acquisition started"
        );
        Ok(Self {
            supervisor,
            accel: ReadCursor::new(),
            gyro: ReadCursor::new(),
            max_batch: ctx.config.transport.max_batch.max(1),
        })
    }

    /// Check producer liveness, applying the restart policy.
    ///
    /// A respawned producer reattaches to the same rings and continues their
    /// running totals, so the cursors carry on unchanged.
    pub fn check(&mut self) -> AppResult<ProducerStatus> {
        self.supervisor.check()
    }

    /// New accelerometer samples in g, oldest first, at most `max_batch`.
    pub fn poll_accel(&mut self) -> Vec<[f64; 3]> {
        self.accel
            .poll(self.supervisor.accel(), self.max_batch)
            .into_iter()
            .map(|s| s.to_units())
            .collect()
    }

    /// New gyroscope samples in deg/s; empty without a gyroscope ring.
    pub fn poll_gyro(&mut self) -> Vec<[f64; 3]> {
        match self.supervisor.gyro() {
            Some(ring) => self
                .gyro
                .poll(ring, self.max_batch)
                .into_iter()
                .map(|s| s.to_units())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Producer respawns so far.
    pub fn restart_count(&self) -> u32 {
        self.supervisor.restart_count()
    }

    /// PID of the running producer.
    pub fn producer_pid(&self) -> Option<u32> {
        self.supervisor.producer_pid()
    }

    /// Accelerometer samples written so far across all producer lifetimes.
    pub fn total_written(&self) -> u64 {
        self.accel.last_total()
    }

    /// Accelerometer samples lost to overruns or the batch cap.
    pub fn dropped(&self) -> u64 {
        self.accel.overruns() + self.accel.trimmed()
    }

    /// Stop the producer and release the rings.
    pub async fn shutdown(self) -> AppResult<()> {
        info!(
            total_written = self.accel.last_total(),
            overruns = self.accel.overruns(),
            trimmed = self.accel.trimmed(),
            "Stopping acquisition"
        );
        self.supervisor.shutdown().await
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Interrupt received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Per-sample timestamps for polled batches.
///
/// A batch of `n` samples at `fs` Hz is back-dated so its newest sample lands
/// on the poll time. A batch never starts before the previous one ended: after
/// a capped catch-up batch the next one is shifted forward to one sample period
/// past the last timestamp handed out, so event times stay monotonic.
#[derive(Debug, Clone, Default)]
pub struct BatchClock {
    last: Option<f64>,
}

impl BatchClock {
    /// Timestamps for a batch of `n` samples at `fs` Hz polled at `now`.
    pub fn stamp(&mut self, now: f64, n: usize, fs: f64) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let period = 1.0 / fs;
        let mut start = now - (n - 1) as f64 * period;
        if let Some(last) = self.last {
            start = start.max(last + period);
        }
        let stamps: Vec<f64> = (0..n).map(|i| start + i as f64 * period).collect();
        self.last = stamps.last().copied();
        stamps
    }
}
