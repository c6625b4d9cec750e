//! `stream`: one accelerometer axis as an MSIG1 float32 stream on stdout.

use std::future::Future;

use clap::{Args, ValueEnum};
use tokio::io::AsyncWrite;
use tracing::{debug, info};

use super::{Acquisition, RunContext};
use crate::error::{AppResult, MotionError};
use crate::stream::{resampler_for, SignalWriter};
use crate::transport::decimator::decimation_factor;
use crate::transport::RestartPolicy;

/// Accelerometer component to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AccelAxis {
    /// X component
    X,
    /// Y component
    Y,
    /// Z component
    Z,
    /// Euclidean norm of all three axes
    #[default]
    Mag,
}

impl AccelAxis {
    /// The selected component of an accelerometer sample, in g.
    pub fn extract(self, sample: [f64; 3]) -> f32 {
        let [x, y, z] = sample;
        let value = match self {
            AccelAxis::X => x,
            AccelAxis::Y => y,
            AccelAxis::Z => z,
            AccelAxis::Mag => (x * x + y * y + z * z).sqrt(),
        };
        value as f32
    }
}

/// Options for the `stream` command.
#[derive(Debug, Clone, Args)]
pub struct StreamArgs {
    /// Output sample rate in Hz (at most the native sensor rate)
    #[arg(long, default_value_t = 800.0)]
    pub rate: f64,

    /// Axis to stream
    #[arg(long, value_enum, default_value_t = AccelAxis::Mag)]
    pub axis: AccelAxis,

    /// Omit the MSIG1 header
    #[arg(long)]
    pub raw: bool,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            rate: 800.0,
            axis: AccelAxis::Mag,
            raw: false,
        }
    }
}

/// Stream to stdout until `shutdown` resolves or the reader goes away.
pub async fn run<F>(ctx: &RunContext, args: &StreamArgs, shutdown: F) -> AppResult<u64>
where
    F: Future<Output = ()>,
{
    run_with_output(ctx, args, shutdown, tokio::io::stdout()).await
}

/// [`run`] with an explicit output; returns the number of samples written.
pub async fn run_with_output<F, W>(
    ctx: &RunContext,
    args: &StreamArgs,
    shutdown: F,
    out: W,
) -> AppResult<u64>
where
    F: Future<Output = ()>,
    W: AsyncWrite + Unpin,
{
    let native = ctx.config.sampling.native_rate_hz;
    if !(args.rate > 0.0 && args.rate <= native) {
        return Err(MotionError::Configuration(format!(
            "--rate must be in (0, {native}]"
        )));
    }
    let decimate = decimation_factor(native, args.rate);
    let worker_rate = native / f64::from(decimate);
    let mut resampler = resampler_for(worker_rate, args.rate)?;

    let mut writer = SignalWriter::open(out, args.rate, args.raw).await?;
    let mut acquisition = Acquisition::start(ctx, decimate, false, RestartPolicy::Fail)?;
    info!(
        rate = args.rate,
        worker_rate,
        decimate,
        axis = ?args.axis,
        resampling = resampler.is_some(),
        "Streaming accelerometer"
    );

    let mut poll = ctx.poll_interval();
    let mut written = 0u64;
    tokio::pin!(shutdown);
    let outcome: AppResult<()> = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = poll.tick() => {
                if let Err(err) = acquisition.check() {
                    break Err(err);
                }
                let values: Vec<f32> = acquisition
                    .poll_accel()
                    .into_iter()
                    .map(|s| args.axis.extract(s))
                    .collect();
                let values = match resampler.as_mut() {
                    Some(r) => r.process(&values),
                    None => values,
                };
                written += values.len() as u64;
                if let Err(err) = writer.write(&values).await {
                    break Err(err);
                }
            }
        }
    };

    let flushed = match &outcome {
        Ok(()) => writer.flush().await,
        Err(_) => Ok(()),
    };
    let shutdown_result = acquisition.shutdown().await;

    match outcome.and(flushed) {
        Err(err) if err.is_broken_pipe() => {
            debug!("Output closed by reader");
        }
        other => other?,
    }
    shutdown_result?;
    Ok(written)
}
