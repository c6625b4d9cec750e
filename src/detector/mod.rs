//! Streaming vibration detector.
//!
//! [`VibrationDetector`] consumes decimated 3-axis samples (in g) one at a time.
//! Each sample is high-passed per axis to remove gravity, reduced to a magnitude,
//! and fed to the per-sample detectors:
//!
//! - three STA/LTA triggers on the magnitude energy (fast, medium, slow),
//! - a bilateral CUSUM around a slowly adapting mean,
//! - rolling kurtosis (1 s) and a median/MAD peak detector (2 s).
//!
//! Whatever fires on one sample is handed to the [`EventClassifier`] as a single
//! set of sources. The slower analyses (band-energy spectrogram, periodicity and
//! heartbeat) run from [`VibrationDetector::tick`] on their own cadence.

pub mod classifier;
pub mod cusum;
pub mod filters;
pub mod kurtosis;
pub mod peak;
pub mod periodicity;
pub mod spectrogram;
pub mod sta_lta;
pub mod window;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::trace;

use crate::config::DetectorConfig;

pub use classifier::{DetectionEvent, DetectorSource, EventClassifier, Severity};
pub use periodicity::{Heartbeat, Periodicity};

use cusum::Cusum;
use filters::{magnitude, BandPass, GravityFilter};
use kurtosis::KurtosisDetector;
use peak::{PeakDetector, PeakStats, PeakTier};
use periodicity::{HeartbeatEstimator, PeriodicityEstimator};
use spectrogram::{BandEnergySpectrogram, BAND_COUNT};
use sta_lta::StaLta;
use window::RollingWindow;

/// Seconds between spectrogram updates.
pub const SPECTROGRAM_INTERVAL_S: f64 = 0.2;

/// Seconds between periodicity and heartbeat estimates.
pub const PERIODICITY_INTERVAL_S: f64 = 1.0;

/// RMS trend entries (10 s at about 10 Hz).
const RMS_TREND_LEN: usize = 100;

/// Point-in-time view of the detector for renderers and log sinks.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorSnapshot {
    /// Input sample rate
    pub sample_rate_hz: f64,
    /// Finite samples processed
    pub sample_count: u64,
    /// Non-finite samples dropped
    pub skipped: u64,
    /// Latest unfiltered sample
    pub latest_raw: [f64; 3],
    /// Latest gravity-removed magnitude
    pub magnitude: f64,
    /// Latest ratio per timescale, fastest first
    pub sta_lta_ratios: [f64; 3],
    /// Trigger state per timescale
    pub sta_lta_active: [bool; 3],
    /// Larger of the two CUSUM accumulators
    pub cusum_level: f64,
    /// Latest rolling kurtosis
    pub kurtosis: f64,
    /// Peak window statistics
    pub peak: PeakStats,
    /// Most recent tier the peak detector reported
    pub last_peak_tier: Option<PeakTier>,
    /// RMS of the peak window, oldest first
    pub rms_trend: Vec<f64>,
    /// Band labels, lowest first
    pub band_labels: Vec<String>,
    /// Latest energy per band, matching `band_labels`
    pub band_energy: [f64; BAND_COUNT],
    /// Latest periodicity estimate
    pub periodicity: Option<Periodicity>,
    /// Curve behind `periodicity`, from the minimum lag
    pub autocorrelation: Vec<f64>,
    /// Latest heartbeat estimate
    pub heartbeat: Option<Heartbeat>,
    /// Events per severity since start
    pub event_counts: BTreeMap<Severity, u64>,
}

/// The full per-sample detector pipeline.
#[derive(Debug, Clone)]
pub struct VibrationDetector {
    fs: f64,
    gravity: GravityFilter,
    heartbeat_band: BandPass,
    sta_lta: [StaLta; 3],
    cusum: Cusum,
    kurtosis: KurtosisDetector,
    peak: PeakDetector,
    spectrogram: BandEnergySpectrogram,
    periodicity: PeriodicityEstimator,
    heartbeat: HeartbeatEstimator,
    classifier: EventClassifier,

    waveform: RollingWindow,
    heartbeat_buffer: RollingWindow,
    rms_window: RollingWindow,
    rms_trend: VecDeque<f64>,
    rms_stride: u64,
    rms_counter: u64,

    sample_count: u64,
    skipped: u64,
    latest_raw: [f64; 3],
    latest_magnitude: f64,
    last_peak_tier: Option<PeakTier>,
    last_spectrogram: Option<f64>,
    last_periodicity: Option<f64>,
}

impl VibrationDetector {
    /// Detector for a stream at `fs` Hz.
    pub fn new(fs: f64, config: &DetectorConfig) -> Self {
        let samples = |seconds: f64| ((fs * seconds).round() as usize).max(1);
        let sta_lta = std::array::from_fn(|i| {
            StaLta::new(
                config.sta_samples[i],
                config.lta_samples[i],
                config.sta_lta_on[i],
                config.sta_lta_off[i],
            )
        });

        Self {
            fs,
            gravity: GravityFilter::new(config.highpass_cutoff_hz, fs),
            heartbeat_band: BandPass::new(config.heartbeat_low_hz, config.heartbeat_high_hz, fs),
            sta_lta,
            cusum: Cusum::new(config.cusum_k, config.cusum_h, config.cusum_adapt),
            kurtosis: KurtosisDetector::new(
                samples(config.kurtosis_window_s),
                config.evaluate_every,
                config.kurtosis_threshold,
            ),
            peak: PeakDetector::new(
                samples(config.peak_window_s),
                config.evaluate_every,
                config.peak_sigma_floor,
            ),
            spectrogram: BandEnergySpectrogram::new(fs),
            periodicity: PeriodicityEstimator::new(fs, config.min_period_correlation),
            heartbeat: HeartbeatEstimator::new(fs, config.min_heartbeat_correlation),
            classifier: EventClassifier::new(
                config.thresholds.clone(),
                config.rearm_ms as f64 / 1000.0,
            ),
            waveform: RollingWindow::new(samples(PeriodicityEstimator::WINDOW_S)),
            heartbeat_buffer: RollingWindow::new(samples(HeartbeatEstimator::WINDOW_S)),
            rms_window: RollingWindow::new(samples(1.0)),
            rms_trend: VecDeque::with_capacity(RMS_TREND_LEN),
            rms_stride: (samples(1.0) as u64 / 10).max(1),
            rms_counter: 0,
            sample_count: 0,
            skipped: 0,
            latest_raw: [0.0; 3],
            latest_magnitude: 0.0,
            last_peak_tier: None,
            last_spectrogram: None,
            last_periodicity: None,
        }
    }

    /// Process one sample (g) observed at `t` (seconds).
    ///
    /// Returns the classified event when any detector fired and the classifier
    /// is armed. Non-finite samples are counted and dropped.
    pub fn process(&mut self, sample: [f64; 3], t: f64) -> Option<DetectionEvent> {
        if sample.iter().any(|v| !v.is_finite()) {
            self.skipped += 1;
            trace!(skipped = self.skipped, "dropping non-finite sample");
            return None;
        }
        self.sample_count += 1;
        self.latest_raw = sample;

        let Some(filtered) = self.gravity.process(sample) else {
            self.waveform.push(0.0);
            self.spectrogram.push(0.0);
            return None;
        };
        let mag = magnitude(filtered);
        self.latest_magnitude = mag;

        self.waveform.push(mag);
        self.spectrogram.push(mag);
        self.heartbeat_buffer.push(self.heartbeat_band.process(mag));
        self.update_rms_trend(mag);

        let mut sources = BTreeSet::new();

        let energy = mag * mag;
        for trigger in self.sta_lta.iter_mut() {
            if trigger.process(energy) {
                sources.insert(DetectorSource::StaLta);
            }
        }
        if self.cusum.process(mag).fired() {
            sources.insert(DetectorSource::Cusum);
        }
        if self.kurtosis.push(mag) {
            sources.insert(DetectorSource::Kurtosis);
        }
        if let Some(tier) = self.peak.push(mag, self.sample_count) {
            self.last_peak_tier = Some(tier);
            sources.insert(DetectorSource::Peak);
        }

        if sources.is_empty() {
            return None;
        }
        let spectrogram = &self.spectrogram;
        self.classifier
            .submit(t, mag, sources, || spectrogram.active_bands())
    }

    fn update_rms_trend(&mut self, mag: f64) {
        self.rms_window.push(mag);
        self.rms_counter += 1;
        if self.rms_counter >= self.rms_stride {
            self.rms_counter = 0;
            if self.rms_trend.len() == RMS_TREND_LEN {
                self.rms_trend.pop_front();
            }
            self.rms_trend.push_back(self.rms_window.rms());
        }
    }

    /// Run the slow analyses that are due at `now` (seconds).
    ///
    /// The spectrogram updates every 0.2 s; periodicity and heartbeat every 1 s.
    pub fn tick(&mut self, now: f64) {
        let due = |last: Option<f64>, interval: f64| last.map_or(true, |l| now - l >= interval);

        if due(self.last_spectrogram, SPECTROGRAM_INTERVAL_S) {
            self.last_spectrogram = Some(now);
            self.spectrogram.update();
        }
        if due(self.last_periodicity, PERIODICITY_INTERVAL_S) {
            self.last_periodicity = Some(now);
            let waveform: Vec<f64> = self.waveform.iter().copied().collect();
            self.periodicity.estimate(&waveform);
            let band: Vec<f64> = self.heartbeat_buffer.iter().copied().collect();
            self.heartbeat.estimate(&band);
        }
    }

    /// Input sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.fs
    }

    /// Finite samples processed so far.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Non-finite samples dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Event classifier and its bounded logs.
    pub fn classifier(&self) -> &EventClassifier {
        &self.classifier
    }

    /// Latest periodicity estimate, if any.
    pub fn periodicity(&self) -> Option<Periodicity> {
        self.periodicity.latest()
    }

    /// Latest heartbeat estimate, if any.
    pub fn heartbeat(&self) -> Option<Heartbeat> {
        self.heartbeat.latest()
    }

    /// Band energies and labels from the latest spectrogram update.
    pub fn spectrogram(&self) -> &BandEnergySpectrogram {
        &self.spectrogram
    }

    /// Copy of the current state for display or logging.
    pub fn snapshot(&self) -> DetectorSnapshot {
        DetectorSnapshot {
            sample_rate_hz: self.fs,
            sample_count: self.sample_count,
            skipped: self.skipped,
            latest_raw: self.latest_raw,
            magnitude: self.latest_magnitude,
            sta_lta_ratios: std::array::from_fn(|i| self.sta_lta[i].ratio()),
            sta_lta_active: std::array::from_fn(|i| self.sta_lta[i].is_active()),
            cusum_level: self.cusum.level(),
            kurtosis: self.kurtosis.value(),
            peak: self.peak.stats(),
            last_peak_tier: self.last_peak_tier,
            rms_trend: self.rms_trend.iter().copied().collect(),
            band_labels: self.spectrogram.labels().to_vec(),
            band_energy: self.spectrogram.latest(),
            periodicity: self.periodicity.latest(),
            autocorrelation: self.periodicity.curve().to_vec(),
            heartbeat: self.heartbeat.latest(),
            event_counts: self.classifier.counts().clone(),
        }
    }
}
