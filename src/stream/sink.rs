//! Output sinks for sensor-driven commands: JSON Lines records or a tone stream.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::codec::SignalWriter;
use super::tone::{ToneConfig, ToneMapper, ToneSynth};
use crate::error::{AppResult, MotionError};

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputMode {
    /// One JSON object per line
    JsonLines,
    /// MSIG1 sine stream whose pitch and volume follow the level
    Tone(ToneConfig),
}

/// A writer in one of the output formats.
#[derive(Debug)]
pub enum OutputSink<W> {
    /// Serializes each record onto its own line
    JsonLines {
        /// Destination
        writer: W,
        /// Reused serialization buffer
        line: Vec<u8>,
    },
    /// Renders one tone chunk per level update
    Tone {
        /// MSIG1 stream, header already written
        writer: SignalWriter<W>,
        /// Phase-continuous sine state
        synth: ToneSynth,
        /// Frames rendered per level update
        chunk_frames: usize,
    },
}

impl<W: AsyncWrite + Unpin> OutputSink<W> {
    /// Open a sink; the tone variant writes its MSIG1 header immediately.
    pub async fn open(writer: W, mode: OutputMode) -> AppResult<Self> {
        Ok(match mode {
            OutputMode::JsonLines => OutputSink::JsonLines {
                writer,
                line: Vec::with_capacity(512),
            },
            OutputMode::Tone(config) => OutputSink::Tone {
                writer: SignalWriter::open(writer, config.sample_rate, false).await?,
                synth: ToneSynth::new(ToneMapper::new(config)),
                chunk_frames: config.chunk_frames(),
            },
        })
    }

    /// Whether frames are written as JSON Lines.
    pub fn is_json(&self) -> bool {
        matches!(self, OutputSink::JsonLines { .. })
    }

    /// Write one record as a JSON line. Tone sinks ignore records.
    pub async fn record<T: Serialize>(&mut self, record: &T) -> AppResult<()> {
        if let OutputSink::JsonLines { writer, line } = self {
            line.clear();
            serde_json::to_writer(&mut *line, record)
                .map_err(|e| MotionError::Io(std::io::Error::other(e)))?;
            line.push(b'\n');
            writer.write_all(line).await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// Render one tone chunk at `level` (0..1). JSON sinks ignore levels.
    pub async fn level(&mut self, level: f64) -> AppResult<()> {
        if let OutputSink::Tone {
            writer,
            synth,
            chunk_frames,
        } = self
        {
            let chunk = synth.render(level, *chunk_frames);
            writer.write(&chunk).await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// Flush anything buffered.
    pub async fn finish(&mut self) -> AppResult<()> {
        match self {
            OutputSink::JsonLines { writer, .. } => writer.flush().await?,
            OutputSink::Tone { writer, .. } => writer.flush().await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn json_sink_writes_lines_and_ignores_levels() {
        let mut sink = OutputSink::open(Vec::new(), OutputMode::JsonLines).await.unwrap();
        assert!(sink.is_json());
        sink.record(&json!({"roll_deg": 1.5})).await.unwrap();
        sink.level(0.5).await.unwrap();
        sink.record(&json!({"roll_deg": 2.0})).await.unwrap();
        let OutputSink::JsonLines { writer, .. } = sink else {
            panic!("json sink expected");
        };
        assert_eq!(
            String::from_utf8(writer).unwrap(),
            "{\"roll_deg\":1.5}\n{\"roll_deg\":2.0}\n"
        );
    }

    #[tokio::test]
    async fn tone_sink_writes_header_and_chunks() {
        let config = ToneConfig::new(8_000.0, 200.0, 800.0, 0.1, 0.5).unwrap();
        let mut sink = OutputSink::open(Vec::new(), OutputMode::Tone(config)).await.unwrap();
        sink.record(&json!({"ignored": true})).await.unwrap();
        sink.level(0.25).await.unwrap();
        sink.level(0.75).await.unwrap();
        sink.finish().await.unwrap();
        let OutputSink::Tone { writer, .. } = sink else {
            panic!("tone sink expected");
        };
        let out = writer.into_inner().await.unwrap();
        assert!(out.starts_with(b"MSIG1 8000\n"));
        assert_eq!(out.len(), 11 + 2 * 160 * 4);
    }
}
