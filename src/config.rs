//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading. Configuration is
//! layered from:
//! 1. Built-in defaults (every field has one, so an empty file is valid)
//! 2. `config/motion.toml` (or the path given with `--config`)
//! 3. Environment variables prefixed with `MOTION_DAQ_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use motion_daq::config::MotionConfig;
//!
//! let config = MotionConfig::load()?;
//! println!("Decimated rate: {} Hz", config.sampling.effective_rate_hz());
//! # Ok::<(), motion_daq::error::MotionError>(())
//! ```

use crate::error::{AppResult, MotionError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/motion.toml";

/// Environment variable prefix for overrides, e.g. `MOTION_DAQ_TRANSPORT__MAX_BATCH=400`.
pub const ENV_PREFIX: &str = "MOTION_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Shared-memory transport settings
    pub transport: TransportConfig,
    /// Sensor sampling settings
    pub sampling: SamplingConfig,
    /// Detector pipeline tuning
    pub detector: DetectorConfig,
    /// Output settings
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "motion-daq".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Shared-memory ring transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Directory holding the ring backing files (`/dev/shm` on Linux when present)
    pub ring_dir: PathBuf,
    /// Number of sample slots per ring
    pub capacity: usize,
    /// Consumer poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum samples processed per poll; older excess is dropped
    pub max_batch: usize,
    /// Grace period between SIGTERM and SIGKILL when stopping the producer
    pub shutdown_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ring_dir: default_ring_dir(),
            capacity: crate::transport::ring::DEFAULT_CAPACITY,
            poll_interval_ms: 20,
            max_batch: 200,
            shutdown_timeout_ms: 1000,
        }
    }
}

fn default_ring_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Sensor sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Native report rate of the sensor in Hz
    pub native_rate_hz: f64,
    /// Requested processing rate in Hz
    pub output_rate_hz: f64,
    /// Sensor source selector (currently `mock`)
    pub source: String,
    /// Seed for the mock source noise generator
    pub mock_seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            native_rate_hz: 800.0,
            output_rate_hz: 100.0,
            source: "mock".to_string(),
            mock_seed: 0x5EED,
        }
    }
}

impl SamplingConfig {
    /// Keep-one-in-N factor derived from the native and requested rates.
    pub fn decimation(&self) -> u32 {
        crate::transport::decimator::decimation_factor(self.native_rate_hz, self.output_rate_hz)
    }

    /// Rate actually delivered through the ring after decimation.
    pub fn effective_rate_hz(&self) -> f64 {
        self.native_rate_hz / f64::from(self.decimation())
    }
}

/// Severity thresholds on the filtered magnitude, in g.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    /// Minimum magnitude for a major shock (with 4+ sources)
    pub major_shock: f64,
    /// Minimum magnitude for a shock (with 3+ sources)
    pub shock: f64,
    /// Minimum magnitude for a micro-shock (peak detector fired)
    pub micro_shock: f64,
    /// Minimum magnitude for a vibration (STA/LTA or CUSUM fired)
    pub vibration: f64,
    /// Minimum magnitude for a light vibration
    pub light_vibration: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            major_shock: 0.05,
            shock: 0.02,
            micro_shock: 0.005,
            vibration: 0.003,
            light_vibration: 0.001,
        }
    }
}

/// Detector pipeline tuning. Window lengths are in seconds and scaled by the
/// decimated sample rate; averaging constants are in samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Gravity-removal high-pass cutoff in Hz
    pub highpass_cutoff_hz: f64,
    /// Heartbeat band lower edge in Hz
    pub heartbeat_low_hz: f64,
    /// Heartbeat band upper edge in Hz
    pub heartbeat_high_hz: f64,
    /// STA averaging lengths (fast, medium, slow)
    pub sta_samples: [usize; 3],
    /// LTA averaging lengths (fast, medium, slow)
    pub lta_samples: [usize; 3],
    /// STA/LTA trigger-on ratios
    pub sta_lta_on: [f64; 3],
    /// STA/LTA trigger-off ratios (must be below the on ratios)
    pub sta_lta_off: [f64; 3],
    /// CUSUM slack per sample
    pub cusum_k: f64,
    /// CUSUM decision interval
    pub cusum_h: f64,
    /// CUSUM running-mean adaptation rate
    pub cusum_adapt: f64,
    /// Kurtosis window in seconds
    pub kurtosis_window_s: f64,
    /// Kurtosis (m4 / m2^2) firing threshold
    pub kurtosis_threshold: f64,
    /// Peak/MAD window in seconds
    pub peak_window_s: f64,
    /// Lower bound on the robust sigma, in g; `0.0` uses the plain MAD sigma
    pub peak_sigma_floor: f64,
    /// Kurtosis and peak/MAD evaluation stride in samples
    pub evaluate_every: u64,
    /// Minimum gap between emitted events in milliseconds
    pub rearm_ms: u64,
    /// Minimum autocorrelation to report a period
    pub min_period_correlation: f64,
    /// Minimum autocorrelation to report a heartbeat
    pub min_heartbeat_correlation: f64,
    /// Event severity thresholds
    pub thresholds: ClassifierThresholds,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            highpass_cutoff_hz: 1.0,
            heartbeat_low_hz: 0.8,
            heartbeat_high_hz: 3.0,
            sta_samples: [3, 15, 50],
            lta_samples: [100, 500, 2000],
            sta_lta_on: [3.0, 2.5, 2.0],
            sta_lta_off: [1.5, 1.3, 1.2],
            cusum_k: 0.0005,
            cusum_h: 0.01,
            cusum_adapt: 0.0001,
            kurtosis_window_s: 1.0,
            kurtosis_threshold: 6.0,
            peak_window_s: 2.0,
            peak_sigma_floor: 0.0003,
            evaluate_every: 10,
            rearm_ms: 10,
            min_period_correlation: 0.1,
            min_heartbeat_correlation: 0.15,
            thresholds: ClassifierThresholds::default(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `vibration_log_*.json` on shutdown
    pub event_log_dir: PathBuf,
    /// Interval between detector status log lines in milliseconds (0 disables)
    pub status_interval_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            event_log_dir: PathBuf::from("."),
            status_interval_ms: 1000,
        }
    }
}

impl MotionConfig {
    /// Load configuration from `config/motion.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix MOTION_DAQ_
    /// Example: MOTION_DAQ_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(MotionConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MotionError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(MotionError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let sampling = &self.sampling;
        if !(sampling.native_rate_hz > 0.0) || !(sampling.output_rate_hz > 0.0) {
            return Err(MotionError::Configuration(
                "native_rate_hz and output_rate_hz must be > 0".to_string(),
            ));
        }
        if sampling.output_rate_hz > sampling.native_rate_hz {
            return Err(MotionError::Configuration(format!(
                "output_rate_hz {} exceeds native_rate_hz {}",
                sampling.output_rate_hz, sampling.native_rate_hz
            )));
        }

        if self.transport.capacity == 0 || self.transport.max_batch == 0 {
            return Err(MotionError::Configuration(
                "transport capacity and max_batch must be > 0".to_string(),
            ));
        }
        if self.transport.poll_interval_ms == 0 {
            return Err(MotionError::Configuration(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }

        let det = &self.detector;
        for i in 0..3 {
            if det.sta_samples[i] == 0 || det.lta_samples[i] <= det.sta_samples[i] {
                return Err(MotionError::Configuration(format!(
                    "STA/LTA timescale {i}: need 0 < sta_samples < lta_samples"
                )));
            }
            if det.sta_lta_off[i] >= det.sta_lta_on[i] {
                return Err(MotionError::Configuration(format!(
                    "STA/LTA timescale {i}: off ratio {} must be below on ratio {}",
                    det.sta_lta_off[i], det.sta_lta_on[i]
                )));
            }
        }
        if !(det.heartbeat_low_hz > 0.0) || det.heartbeat_high_hz <= det.heartbeat_low_hz {
            return Err(MotionError::Configuration(
                "heartbeat band requires 0 < heartbeat_low_hz < heartbeat_high_hz".to_string(),
            ));
        }
        if !(det.highpass_cutoff_hz > 0.0) {
            return Err(MotionError::Configuration(
                "highpass_cutoff_hz must be > 0".to_string(),
            ));
        }
        if det.evaluate_every == 0 {
            return Err(MotionError::Configuration(
                "evaluate_every must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
