//! `orientation`: Mahony attitude from accelerometer and gyroscope, emitted as
//! JSON Lines frames or a tone whose pitch follows one axis.

use std::future::Future;

use clap::Args;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{unix_now, Acquisition, BatchClock, RunContext};
use crate::error::AppResult;
use crate::orientation::{angle_level, Axis, EulerAngles, Mahony, StepClock};
use crate::stream::{OutputMode, OutputSink, ToneConfig, ToneMapper};
use crate::transport::RestartPolicy;

/// Options for the `orientation` command.
#[derive(Debug, Clone, Args)]
pub struct OrientationArgs {
    /// Tone sample rate in Hz
    #[arg(long, default_value_t = 24_000.0)]
    pub rate: f64,

    /// Tone frequency at level 0
    #[arg(long, default_value_t = 500.0)]
    pub low_hz: f64,

    /// Tone frequency at level 1
    #[arg(long, default_value_t = 5_000.0)]
    pub high_hz: f64,

    /// Tone amplitude at level 0
    #[arg(long, default_value_t = 0.02)]
    pub low_volume: f64,

    /// Tone amplitude at level 1
    #[arg(long, default_value_t = 0.7)]
    pub high_volume: f64,

    /// Emit JSON Lines frames instead of a tone stream
    #[arg(long)]
    pub json: bool,

    /// Axis driving the tone level
    #[arg(long, value_enum, default_value_t = Axis::Roll)]
    pub axis: Axis,

    /// Keep one in N sensor reports
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
    pub decimate: u32,
}

impl Default for OrientationArgs {
    fn default() -> Self {
        Self {
            rate: 24_000.0,
            low_hz: 500.0,
            high_hz: 5_000.0,
            low_volume: 0.02,
            high_volume: 0.7,
            json: false,
            axis: Axis::Roll,
            decimate: 8,
        }
    }
}

impl OrientationArgs {
    /// Validated tone settings from the command line.
    pub fn tone_config(&self) -> AppResult<ToneConfig> {
        ToneConfig::new(
            self.rate,
            self.low_hz,
            self.high_hz,
            self.low_volume,
            self.high_volume,
        )
    }
}

/// One JSON Lines orientation record.
#[derive(Debug, Clone, Serialize)]
pub struct OrientationFrame {
    /// Always `gyroscope`
    pub sensor: &'static str,
    /// Seconds since the Unix epoch
    pub time: f64,
    /// Axis driving `level`
    pub axis: Axis,
    /// Angle of `axis` in degrees
    pub orientation_proxy_deg: f64,
    /// Filter roll in degrees
    pub roll_deg: f64,
    /// Filter pitch in degrees
    pub pitch_deg: f64,
    /// Filter yaw in degrees
    pub yaw_deg: f64,
    /// X rate in deg/s
    pub gyro_x: f64,
    /// Y rate
    pub gyro_y: f64,
    /// Z rate
    pub gyro_z: f64,
    /// X acceleration in g
    pub accel_x: f64,
    /// Y acceleration
    pub accel_y: f64,
    /// Z acceleration
    pub accel_z: f64,
    /// Angle folded into `0..1`
    pub level: f64,
    /// Tone frequency for `level`
    pub freq_hz: f64,
    /// Tone amplitude for `level`
    pub volume: f64,
}

impl OrientationFrame {
    /// Frame for the filter state after one accepted sample.
    pub fn new(
        time: f64,
        axis: Axis,
        euler: EulerAngles,
        gyro: [f64; 3],
        accel: [f64; 3],
        mapper: &ToneMapper,
    ) -> Self {
        let angle = euler.axis(axis);
        let level = angle_level(angle);
        let (freq_hz, volume) = mapper.map(level);
        Self {
            sensor: "gyroscope",
            time,
            axis,
            orientation_proxy_deg: angle,
            roll_deg: euler.roll,
            pitch_deg: euler.pitch,
            yaw_deg: euler.yaw,
            gyro_x: gyro[0],
            gyro_y: gyro[1],
            gyro_z: gyro[2],
            accel_x: accel[0],
            accel_y: accel[1],
            accel_z: accel[2],
            level,
            freq_hz,
            volume,
        }
    }
}

/// Run until `shutdown` resolves or the reader goes away.
pub async fn run<F>(ctx: &RunContext, args: &OrientationArgs, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()>,
{
    run_with_output(ctx, args, shutdown, tokio::io::stdout()).await
}

/// [`run`] with an explicit output.
pub async fn run_with_output<F, W>(
    ctx: &RunContext,
    args: &OrientationArgs,
    shutdown: F,
    out: W,
) -> AppResult<()>
where
    F: Future<Output = ()>,
    W: AsyncWrite + Unpin,
{
    let tone = args.tone_config()?;
    let mapper = ToneMapper::new(tone);
    let mode = if args.json {
        OutputMode::JsonLines
    } else {
        OutputMode::Tone(tone)
    };
    let fs = ctx.config.sampling.native_rate_hz / f64::from(args.decimate.max(1));

    let mut sink = OutputSink::open(out, mode).await?;
    let mut acquisition = Acquisition::start(ctx, args.decimate, true, RestartPolicy::Fail)?;
    info!(
        axis = ?args.axis,
        json = args.json,
        sample_rate_hz = fs,
        "Orientation running"
    );

    let mut filter = Mahony::new();
    let mut clock = StepClock::default();
    let mut stamps = BatchClock::default();
    let started = Instant::now();
    let mut poll = ctx.poll_interval();
    tokio::pin!(shutdown);

    let outcome: AppResult<()> = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = poll.tick() => {
                if let Err(err) = acquisition.check() {
                    break Err(err);
                }
                if let Some(gyro) = acquisition.poll_gyro().last() {
                    filter.set_gyro(*gyro);
                }
                let accel = acquisition.poll_accel();
                let mono = started.elapsed().as_secs_f64();
                let wall = unix_now();
                let mut emitted = Ok(());
                for (sample, t) in accel.iter().zip(stamps.stamp(mono, accel.len(), fs)) {
                    let dt = clock.step(t);
                    if !filter.update(*sample, dt) || !sink.is_json() {
                        continue;
                    }
                    let frame = OrientationFrame::new(
                        wall - (mono - t),
                        args.axis,
                        filter.euler(),
                        filter.gyro(),
                        *sample,
                        &mapper,
                    );
                    emitted = sink.record(&frame).await;
                    if emitted.is_err() {
                        break;
                    }
                }
                if emitted.is_ok() && !sink.is_json() {
                    emitted = sink.level(angle_level(filter.euler().axis(args.axis))).await;
                }
                if let Err(err) = emitted {
                    break Err(err);
                }
            }
        }
    };

    let finished = match &outcome {
        Ok(()) => sink.finish().await,
        Err(_) => Ok(()),
    };
    let shutdown_result = acquisition.shutdown().await;

    match outcome.and(finished) {
        Err(err) if err.is_broken_pipe() => debug!("Output closed by reader"),
        other => other?,
    }
    shutdown_result
}
