//! `resample`: convert an MSIG1 stream on stdin to another rate on stdout.

use clap::Args;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::error::{AppResult, MotionError};
use crate::stream::{LinearResampler, SignalReader, SignalWriter};

/// Options for the `resample` command.
#[derive(Debug, Clone, Args)]
pub struct ResampleArgs {
    /// Output sample rate in Hz
    #[arg(long)]
    pub rate: f64,

    /// Input is headerless float32 (requires --input-rate)
    #[arg(long)]
    pub raw: bool,

    /// Input sample rate for raw input
    #[arg(long, value_name = "HZ")]
    pub input_rate: Option<f64>,
}

/// Resample stdin to stdout; returns the number of samples written.
pub async fn run(args: &ResampleArgs) -> AppResult<u64> {
    run_with_io(args, tokio::io::stdin(), tokio::io::stdout()).await
}

/// [`run`] over arbitrary reader and writer.
pub async fn run_with_io<R, W>(args: &ResampleArgs, input: R, output: W) -> AppResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !(args.rate > 0.0 && args.rate.is_finite()) {
        return Err(MotionError::Configuration("--rate must be > 0".to_string()));
    }
    if args.raw && !args.input_rate.is_some_and(|r| r > 0.0) {
        return Err(MotionError::StreamFormat(
            "raw mode requires --input-rate".to_string(),
        ));
    }
    let mut reader = SignalReader::open(input, args.raw, args.input_rate).await?;
    let mut resampler = LinearResampler::new(reader.sample_rate(), args.rate)?;
    info!(
        input_rate = reader.sample_rate(),
        output_rate = args.rate,
        "Resampling"
    );

    let mut writer = SignalWriter::open(output, args.rate, false).await?;
    let mut written = 0u64;
    let result: AppResult<()> = async {
        while let Some(chunk) = reader.next_chunk().await? {
            let out = resampler.process(&chunk);
            written += out.len() as u64;
            writer.write(&out).await?;
        }
        writer.flush().await
    }
    .await;

    match result {
        Err(err) if err.is_broken_pipe() => debug!("Output closed by reader"),
        other => other?,
    }
    Ok(written)
}
