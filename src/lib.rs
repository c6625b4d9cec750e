//! # Motion DAQ Library
//!
//! Real-time motion sensing over a two-process pipeline. A producer process
//! reads IMU reports, decimates them and writes fixed-point samples into
//! memory-mapped ring files; the consumer polls those rings and drives either
//! the vibration detector, an orientation filter, or a float32 signal stream.
//!
//! ## Crate Structure
//!
//! - **`config`**: `MotionConfig`, loaded with `figment` from `config/motion.toml`
//!   and `MOTION_DAQ_*` environment variables.
//! - **`error`**: the crate-wide `MotionError` enum and `AppResult` alias.
//! - **`logging`**: `tracing` subscriber setup; all logs go to stderr.
//! - **`transport`**: the shared-memory `RingBuffer`, the `SampleDecimator` and the
//!   `ProducerSupervisor` that spawns and restarts the producer process.
//! - **`hardware`**: the `SensorSource` capability, the mock IMU, and the producer
//!   process entry point.
//! - **`detector`**: the streaming `VibrationDetector` (STA/LTA, CUSUM, kurtosis,
//!   peak/MAD, band-energy spectrogram, periodicity, heartbeat) and the
//!   `EventClassifier`.
//! - **`orientation`**: the Mahony attitude filter.
//! - **`stream`**: the MSIG1 codec, linear resampler, tone synthesis and output sinks.
//! - **`runner`**: the async command loops behind `detect`, `stream`, `orientation`
//!   and `resample`.

pub mod config;
pub mod detector;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod orientation;
pub mod runner;
pub mod stream;
pub mod transport;
