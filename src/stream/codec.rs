//! MSIG1 mono float32 stream format.
//!
//! A stream is an ASCII header line `MSIG1 <rate>\n` followed by little-endian
//! `f32` samples. Raw streams omit the header and need the rate out of band.

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{AppResult, MotionError};

/// Header magic, including the separating space.
pub const MAGIC: &[u8; 6] = b"MSIG1 ";

/// Longest rate field accepted after the magic.
pub const MAX_RATE_BYTES: usize = 20;

/// Pending payload size that forces a flush.
pub const FLUSH_BYTES: usize = 4096;

/// Longest time payload may sit unflushed.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes requested from the input per read.
pub const READ_CHUNK: usize = 16 * 1024;

const SAMPLE_BYTES: usize = 4;

/// Header line for a stream at `sample_rate` Hz (rounded to an integer).
pub fn encode_header(sample_rate: f64) -> Vec<u8> {
    format!("MSIG1 {}\n", sample_rate.round() as i64).into_bytes()
}

/// Append samples as little-endian `f32`.
pub fn encode_samples(samples: &[f32], out: &mut BytesMut) {
    out.reserve(samples.len() * SAMPLE_BYTES);
    for &s in samples {
        out.put_f32_le(s);
    }
}

/// Drain every whole sample from `buf`, leaving a trailing partial sample in place.
pub fn decode_samples(buf: &mut BytesMut) -> Vec<f32> {
    let count = buf.len() / SAMPLE_BYTES;
    let mut aligned = buf.split_to(count * SAMPLE_BYTES);
    let mut out = Vec::with_capacity(count);
    while aligned.has_remaining() {
        out.push(aligned.get_f32_le());
    }
    out
}

/// Parsed start of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    /// Samples per second
    pub sample_rate: f64,
    /// Bytes consumed while probing that belong to the payload (raw mode).
    pub prefix: Vec<u8>,
}

async fn read_up_to<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> AppResult<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buf.truncate(filled);
    Ok(buf)
}

fn parse_rate(field: &[u8]) -> AppResult<f64> {
    if field.is_empty() {
        return Err(MotionError::StreamFormat(
            "missing sample rate in header".to_string(),
        ));
    }
    let rate = std::str::from_utf8(field)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .filter(|rate| rate.is_finite())
        .ok_or_else(|| MotionError::StreamFormat("invalid sample rate in header".to_string()))?;
    if rate <= 0.0 {
        return Err(MotionError::StreamFormat(
            "sample rate must be > 0".to_string(),
        ));
    }
    Ok(rate)
}

/// Read the MSIG1 header, or accept a headerless stream when `raw` is set.
///
/// A stream that starts with the magic is always parsed as a header. Otherwise
/// the probed bytes are returned as payload prefix in raw mode, which requires
/// `raw_rate`.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    raw: bool,
    raw_rate: Option<f64>,
) -> AppResult<StreamHeader> {
    let prefix = read_up_to(reader, MAGIC.len()).await?;
    if prefix.is_empty() {
        return Err(MotionError::StreamFormat("no input available".to_string()));
    }

    if prefix.as_slice() == MAGIC {
        let mut field = Vec::with_capacity(MAX_RATE_BYTES);
        let mut byte = [0u8; 1];
        for _ in 0..MAX_RATE_BYTES {
            if reader.read(&mut byte).await? == 0 || byte[0] == b'\n' {
                break;
            }
            field.push(byte[0]);
        }
        let sample_rate = parse_rate(&field)?;
        return Ok(StreamHeader {
            sample_rate,
            prefix: Vec::new(),
        });
    }

    if raw {
        return match raw_rate {
            Some(rate) if rate > 0.0 => Ok(StreamHeader {
                sample_rate: rate,
                prefix,
            }),
            _ => Err(MotionError::StreamFormat(
                "raw mode requires --rate".to_string(),
            )),
        };
    }

    Err(MotionError::StreamFormat(
        "expected MSIG1 stream header; use --raw --rate <hz> for raw float32 input".to_string(),
    ))
}

/// Incremental reader of `f32` samples.
#[derive(Debug)]
pub struct SignalReader<R> {
    reader: R,
    sample_rate: f64,
    carry: BytesMut,
    scratch: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> SignalReader<R> {
    /// Consume the header (see [`read_header`]) and prepare to read samples.
    pub async fn open(mut reader: R, raw: bool, raw_rate: Option<f64>) -> AppResult<Self> {
        let header = read_header(&mut reader, raw, raw_rate).await?;
        debug!(sample_rate = header.sample_rate, raw, "opened signal stream");
        Ok(Self {
            reader,
            sample_rate: header.sample_rate,
            carry: BytesMut::from(header.prefix.as_slice()),
            scratch: vec![0u8; READ_CHUNK],
            eof: false,
        })
    }

    /// Rate from the header, or the one given for raw input.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Next batch of whole samples; `None` at end of input.
    ///
    /// Partial samples are carried into the next read. A trailing partial
    /// sample at end of input is dropped.
    pub async fn next_chunk(&mut self) -> AppResult<Option<Vec<f32>>> {
        loop {
            if self.eof {
                let rest = decode_samples(&mut self.carry);
                self.carry.clear();
                return Ok((!rest.is_empty()).then_some(rest));
            }
            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                self.eof = true;
                continue;
            }
            self.carry.extend_from_slice(&self.scratch[..n]);
            let samples = decode_samples(&mut self.carry);
            if !samples.is_empty() {
                return Ok(Some(samples));
            }
        }
    }
}

/// Batched writer of `f32` samples.
///
/// Payload is held until [`FLUSH_BYTES`] accumulate or [`FLUSH_INTERVAL`]
/// passes since the last flush.
#[derive(Debug)]
pub struct SignalWriter<W> {
    writer: W,
    sample_rate: f64,
    pending: BytesMut,
    last_flush: Instant,
}

impl<W: AsyncWrite + Unpin> SignalWriter<W> {
    /// Writer at `sample_rate`; the header is written immediately unless `raw`.
    pub async fn open(mut writer: W, sample_rate: f64, raw: bool) -> AppResult<Self> {
        if !raw {
            writer.write_all(&encode_header(sample_rate)).await?;
            writer.flush().await?;
        }
        Ok(Self {
            writer,
            sample_rate,
            pending: BytesMut::with_capacity(FLUSH_BYTES * 2),
            last_flush: Instant::now(),
        })
    }

    /// Rate written in the header.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Bytes buffered but not yet written.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue samples, flushing if a threshold is reached.
    pub async fn write(&mut self, samples: &[f32]) -> AppResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        encode_samples(samples, &mut self.pending);
        if self.pending.len() >= FLUSH_BYTES || self.last_flush.elapsed() >= FLUSH_INTERVAL {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write out everything pending.
    pub async fn flush(&mut self) -> AppResult<()> {
        if !self.pending.is_empty() {
            let payload = self.pending.split();
            self.writer.write_all(&payload).await?;
        }
        self.writer.flush().await?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub async fn into_inner(mut self) -> AppResult<W> {
        self.flush().await?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(samples: &[f32]) -> Vec<u8> {
        let mut out = BytesMut::new();
        encode_samples(samples, &mut out);
        out.to_vec()
    }

    #[test]
    fn header_rounds_rate() {
        assert_eq!(encode_header(800.0), b"MSIG1 800\n");
        assert_eq!(encode_header(44_099.6), b"MSIG1 44100\n");
    }

    #[test]
    fn decode_keeps_partial_sample() {
        let mut buf = BytesMut::from(payload(&[1.0, -2.5]).as_slice());
        buf.put_u8(0xAB);
        assert_eq!(decode_samples(&mut buf), vec![1.0, -2.5]);
        assert_eq!(buf.as_ref(), &[0xAB]);
    }

    #[tokio::test]
    async fn reads_header_and_payload() {
        let mut input = b"MSIG1 100\n".to_vec();
        input.extend(payload(&[0.5, 0.25, -1.0]));
        let mut reader = SignalReader::open(input.as_slice(), false, None)
            .await
            .unwrap();
        assert_eq!(reader.sample_rate(), 100.0);
        assert_eq!(reader.next_chunk().await.unwrap(), Some(vec![0.5, 0.25, -1.0]));
        assert_eq!(reader.next_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn header_errors_are_format_errors() {
        for (input, message) in [
            (&b"MSIG1 \n"[..], "missing sample rate"),
            (&b"MSIG1 fast\n"[..], "invalid sample rate"),
            (&b"MSIG1 -5\n"[..], "must be > 0"),
            (&b"RIFF0000"[..], "expected MSIG1"),
            (&b""[..], "no input"),
        ] {
            let mut reader = input;
            let err = read_header(&mut reader, false, None).await.unwrap_err();
            assert!(matches!(err, MotionError::StreamFormat(_)));
            assert!(err.to_string().contains(message), "{err}");
        }
    }

    #[tokio::test]
    async fn raw_mode_requires_rate_and_keeps_prefix() {
        let data = payload(&[1.0, 2.0, 3.0]);
        let mut reader = data.as_slice();
        let err = read_header(&mut reader, true, None).await.unwrap_err();
        assert!(err.to_string().contains("raw mode requires --rate"));

        let mut reader = SignalReader::open(data.as_slice(), true, Some(48_000.0))
            .await
            .unwrap();
        assert_eq!(reader.sample_rate(), 48_000.0);
        assert_eq!(reader.next_chunk().await.unwrap(), Some(vec![1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn header_wins_even_in_raw_mode() {
        let mut input = b"MSIG1 8000\n".to_vec();
        input.extend(payload(&[7.0]));
        let mut reader = SignalReader::open(input.as_slice(), true, Some(1.0))
            .await
            .unwrap();
        assert_eq!(reader.sample_rate(), 8000.0);
        assert_eq!(reader.next_chunk().await.unwrap(), Some(vec![7.0]));
    }

    #[tokio::test]
    async fn trailing_partial_sample_is_dropped() {
        let mut input = b"MSIG1 10\n".to_vec();
        input.extend(payload(&[1.0, 2.0]));
        input.extend([0x00, 0x01]);
        let mut reader = SignalReader::open(input.as_slice(), false, None)
            .await
            .unwrap();
        let mut all = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            all.extend(chunk);
        }
        assert_eq!(all, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn writer_batches_until_threshold() {
        let mut writer = SignalWriter::open(Vec::new(), 100.0, false).await.unwrap();
        writer.write(&[1.0; 10]).await.unwrap();
        assert_eq!(writer.pending(), 40);
        writer.write(&[2.0; 1024]).await.unwrap();
        assert_eq!(writer.pending(), 0);

        let out = writer.into_inner().await.unwrap();
        assert!(out.starts_with(b"MSIG1 100\n"));
        assert_eq!(out.len(), 10 + 4 * 1034);
    }

    #[tokio::test]
    async fn raw_writer_omits_header() {
        let mut writer = SignalWriter::open(Vec::new(), 100.0, true).await.unwrap();
        writer.write(&[0.5]).await.unwrap();
        let out = writer.into_inner().await.unwrap();
        assert_eq!(out, 0.5f32.to_le_bytes());
    }
}
