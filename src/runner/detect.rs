//! `detect`: live vibration detection with an event log written on exit.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::Args;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use super::{unix_now, Acquisition, BatchClock, RunContext};
use crate::detector::{DetectionEvent, DetectorSource, Severity, VibrationDetector};
use crate::error::{AppResult, MotionError};
use crate::transport::RestartPolicy;

/// Options for the `detect` command.
#[derive(Debug, Clone, Default, Args)]
pub struct DetectArgs {
    /// Print events as JSON lines instead of text
    #[arg(long)]
    pub json: bool,

    /// Do not write the event log on exit
    #[arg(long)]
    pub no_log: bool,

    /// Directory for the event log (overrides `output.event_log_dir`)
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

/// What a finished `detect` run produced.
#[derive(Debug, Clone)]
pub struct DetectSummary {
    /// Samples processed
    pub total_samples: u64,
    /// Events emitted, including any evicted from the log
    pub events: u64,
    /// Producer respawns
    pub restarts: u32,
    /// Event log file, when one was written
    pub log_path: Option<PathBuf>,
}

/// One event as stored in the exported log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    /// Local time, `HH:MM:SS.mmm`
    pub time: String,
    /// Serialized as `MICRO_SHOCK`, `SHOCK`, ...
    pub severity: Severity,
    /// Magnitude in g, rounded to 6 decimals
    pub amplitude: f64,
    /// Contributing detectors in order
    pub sources: Vec<DetectorSource>,
    /// Active spectral bands
    pub bands: Vec<String>,
}

impl From<&DetectionEvent> for EventLogEntry {
    fn from(event: &DetectionEvent) -> Self {
        Self {
            time: event.time.clone(),
            severity: event.severity,
            amplitude: (event.magnitude * 1e6).round() / 1e6,
            sources: event.sources.iter().copied().collect(),
            bands: event.bands.clone(),
        }
    }
}

/// The `vibration_log_*.json` document.
#[derive(Debug, Clone, Serialize)]
pub struct EventLog {
    /// RFC 3339 generation time
    pub generated: String,
    /// Producer respawns during the run
    pub restarts: u32,
    /// Samples processed
    pub total_samples: u64,
    /// Retained events, oldest first
    pub events: Vec<EventLogEntry>,
    #[serde(skip)]
    generated_at: DateTime<Local>,
}

impl EventLog {
    /// Log of `events` as of `generated_at`.
    pub fn new<'a>(
        generated_at: DateTime<Local>,
        restarts: u32,
        total_samples: u64,
        events: impl IntoIterator<Item = &'a DetectionEvent>,
    ) -> Self {
        Self {
            generated: generated_at.to_rfc3339(),
            restarts,
            total_samples,
            events: events.into_iter().map(EventLogEntry::from).collect(),
            generated_at,
        }
    }

    /// `vibration_log_<YYYYmmdd_HHMMSS>.json`
    pub fn file_name(&self) -> String {
        format!(
            "vibration_log_{}.json",
            self.generated_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write the log as pretty JSON into `dir`, returning the file path.
    pub fn write_to(&self, dir: &Path) -> AppResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| MotionError::Io(std::io::Error::other(e)))?;
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

/// Run the detector until `shutdown` resolves, printing events to stdout.
pub async fn run<F>(ctx: &RunContext, args: &DetectArgs, shutdown: F) -> AppResult<DetectSummary>
where
    F: Future<Output = ()>,
{
    run_with_output(ctx, args, shutdown, tokio::io::stdout()).await
}

/// [`run`] with an explicit event output.
pub async fn run_with_output<F, W>(
    ctx: &RunContext,
    args: &DetectArgs,
    shutdown: F,
    mut out: W,
) -> AppResult<DetectSummary>
where
    F: Future<Output = ()>,
    W: AsyncWrite + Unpin,
{
    let sampling = &ctx.config.sampling;
    let decimate = sampling.decimation();
    let fs = sampling.effective_rate_hz();
    let mut detector = VibrationDetector::new(fs, &ctx.config.detector);
    let mut acquisition = Acquisition::start(ctx, decimate, false, RestartPolicy::Restart)?;
    info!(sample_rate_hz = fs, decimate, "Detector running");

    let mut poll = ctx.poll_interval();
    let mut status = interval(Duration::from_millis(
        ctx.config.output.status_interval_ms.max(1),
    ));
    status.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut clock = BatchClock::default();
    tokio::pin!(shutdown);
    let outcome: AppResult<()> = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = poll.tick() => {
                if let Err(err) = acquisition.check() {
                    break Err(err);
                }
                let samples = acquisition.poll_accel();
                let now = unix_now();
                let mut emitted = Ok(());
                for (sample, t) in samples.iter().zip(clock.stamp(now, samples.len(), fs)) {
                    if let Some(event) = detector.process(*sample, t) {
                        emitted = emit_event(&mut out, &event, args.json).await;
                        if emitted.is_err() {
                            break;
                        }
                    }
                }
                if let Err(err) = emitted {
                    break Err(err);
                }
                detector.tick(now);
            }
            _ = status.tick() => {
                let periodicity = detector.periodicity();
                let heartbeat = detector.heartbeat();
                info!(
                    samples = detector.sample_count(),
                    events = detector.classifier().total(),
                    restarts = acquisition.restart_count(),
                    dropped = acquisition.dropped(),
                    period_s = periodicity.map(|p| p.period_s),
                    bpm = heartbeat.map(|h| h.bpm),
                    "Detector status"
                );
            }
        }
    };

    let restarts = acquisition.restart_count();
    let shutdown_result = acquisition.shutdown().await;
    flush_output(&mut out).await;

    let log_path = if args.no_log {
        None
    } else {
        let dir = args
            .log_dir
            .clone()
            .unwrap_or_else(|| ctx.config.output.event_log_dir.clone());
        let log = EventLog::new(
            Local::now(),
            restarts,
            detector.sample_count(),
            detector.classifier().events(),
        );
        match log.write_to(&dir) {
            Ok(path) => {
                info!(path = %path.display(), events = log.events.len(), "Event log written");
                Some(path)
            }
            Err(err) => {
                warn!(error = %err, "Failed to write event log");
                None
            }
        }
    };

    outcome?;
    shutdown_result?;

    Ok(DetectSummary {
        total_samples: detector.sample_count(),
        events: detector.classifier().total(),
        restarts,
        log_path,
    })
}

/// Final flush of the event output. A closed reader is expected at shutdown.
async fn flush_output<W: AsyncWrite + Unpin>(out: &mut W) {
    if let Err(err) = out.flush().await {
        if err.kind() != std::io::ErrorKind::BrokenPipe {
            warn!(error = %err, "Failed to flush event output");
        }
    }
}

async fn emit_event<W: AsyncWrite + Unpin>(
    out: &mut W,
    event: &DetectionEvent,
    json: bool,
) -> AppResult<()> {
    let mut line = if json {
        serde_json::to_string(event).map_err(|e| MotionError::Io(std::io::Error::other(e)))?
    } else {
        let sources: Vec<&str> = event.sources.iter().map(|s| s.name()).collect();
        format!(
            "{} {} {:<11} {:.6}g [{}] {}",
            event.symbol,
            event.time,
            event.label,
            event.magnitude,
            sources.join(","),
            event.bands.join(" ")
        )
    };
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}
