//! Mono float32 signal streaming: the MSIG1 codec, rate conversion and tone output.

pub mod codec;
pub mod resampler;
pub mod sink;
pub mod tone;

pub use codec::{read_header, SignalReader, SignalWriter, StreamHeader};
pub use resampler::{resampler_for, LinearResampler};
pub use sink::{OutputMode, OutputSink};
pub use tone::{ToneConfig, ToneMapper, ToneSynth};
