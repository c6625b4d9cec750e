//! Autocorrelation-based period and heartbeat extraction.

use serde::Serialize;

/// Below this total energy a window is treated as flat.
const FLAT_ENERGY: f64 = 1e-20;

/// Normalized autocorrelation of the mean-centered `values` for lags in `min_lag..max_lag`.
///
/// Each entry is `Σ c[i]·c[i+lag] / Σ c[i]²`, so longer lags are biased toward
/// zero. `None` for a flat window.
pub fn autocorrelation(values: &[f64], min_lag: usize, max_lag: usize) -> Option<Vec<f64>> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let energy: f64 = centered.iter().map(|c| c * c).sum();
    if energy < FLAT_ENERGY {
        return None;
    }

    let curve = (min_lag..max_lag.min(n))
        .map(|lag| {
            let s: f64 = centered[..n - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum();
            s / energy
        })
        .collect();
    Some(curve)
}

/// Index and value of the first maximum.
fn best(curve: &[f64]) -> Option<(usize, f64)> {
    curve
        .iter()
        .copied()
        .enumerate()
        .fold(None, |acc, (i, v)| match acc {
            Some((_, best)) if best >= v => acc,
            _ => Some((i, v)),
        })
}

/// Dominant period of the vibration magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Periodicity {
    /// Seconds
    pub period_s: f64,
    /// Hz
    pub frequency_hz: f64,
    /// Peak autocorrelation
    pub regularity: f64,
    /// `period · (1 − regularity)`
    pub jitter_s: f64,
}

/// Estimates the dominant period over the most recent 5 s.
#[derive(Debug, Clone)]
pub struct PeriodicityEstimator {
    fs: f64,
    min_correlation: f64,
    curve: Vec<f64>,
    latest: Option<Periodicity>,
}

impl PeriodicityEstimator {
    /// Seconds of history used.
    pub const WINDOW_S: f64 = 5.0;
    /// Seconds of history required.
    pub const MIN_HISTORY_S: f64 = 2.0;

    /// Estimator for a signal sampled at `fs` Hz.
    pub fn new(fs: f64, min_correlation: f64) -> Self {
        Self {
            fs,
            min_correlation,
            curve: Vec::new(),
            latest: None,
        }
    }

    /// Re-estimate from `waveform` (oldest first). Only the last 5 s are used.
    pub fn estimate(&mut self, waveform: &[f64]) -> Option<Periodicity> {
        self.latest = None;
        if (waveform.len() as f64) < self.fs * Self::MIN_HISTORY_S {
            self.curve.clear();
            return None;
        }
        let keep = ((self.fs * Self::WINDOW_S) as usize).min(waveform.len());
        let buf = &waveform[waveform.len() - keep..];
        let n = buf.len();

        let min_lag = ((self.fs * 0.05) as usize).max(5);
        let max_lag = (n / 2).min((self.fs * 2.5) as usize);
        let Some(curve) = autocorrelation(buf, min_lag, max_lag) else {
            self.curve.clear();
            return None;
        };
        self.curve = curve;

        let (index, value) = best(&self.curve)?;
        if value <= self.min_correlation {
            return None;
        }
        let lag = (min_lag + index) as f64;
        let period_s = lag / self.fs;
        self.latest = Some(Periodicity {
            period_s,
            frequency_hz: self.fs / lag,
            regularity: value,
            jitter_s: period_s * (1.0 - value).max(0.0),
        });
        self.latest
    }

    /// Autocorrelation curve from the last estimate, starting at the minimum lag.
    pub fn curve(&self) -> &[f64] {
        &self.curve
    }

    /// Result of the last estimate.
    pub fn latest(&self) -> Option<Periodicity> {
        self.latest
    }
}

/// Heart rate estimate from the band-limited buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Heartbeat {
    /// Beats per minute
    pub bpm: f64,
    /// Peak autocorrelation clamped to `[0, 1]`
    pub confidence: f64,
}

/// Searches lags corresponding to 50..200 BPM over a 10 s buffer.
#[derive(Debug, Clone)]
pub struct HeartbeatEstimator {
    fs: f64,
    min_correlation: f64,
    latest: Option<Heartbeat>,
}

impl HeartbeatEstimator {
    /// Seconds of history used.
    pub const WINDOW_S: f64 = 10.0;
    /// Seconds of history required.
    pub const MIN_HISTORY_S: f64 = 5.0;

    /// Estimator for a signal sampled at `fs` Hz.
    pub fn new(fs: f64, min_correlation: f64) -> Self {
        Self {
            fs,
            min_correlation,
            latest: None,
        }
    }

    /// Re-estimate from the band-passed buffer (oldest first).
    pub fn estimate(&mut self, band: &[f64]) -> Option<Heartbeat> {
        self.latest = None;
        if (band.len() as f64) < self.fs * Self::MIN_HISTORY_S {
            return None;
        }
        let keep = ((self.fs * Self::WINDOW_S) as usize).min(band.len());
        let buf = &band[band.len() - keep..];

        // 200 BPM .. 50 BPM
        let lag_lo = (self.fs * 0.3) as usize;
        let lag_hi = ((self.fs * 1.2) as usize).min(buf.len() / 2);
        if lag_lo >= lag_hi {
            return None;
        }
        let curve = autocorrelation(buf, lag_lo, lag_hi)?;
        let (index, value) = best(&curve)?;
        if value <= self.min_correlation {
            return None;
        }
        let lag = (lag_lo + index) as f64;
        self.latest = Some(Heartbeat {
            bpm: 60.0 / (lag / self.fs),
            confidence: value.clamp(0.0, 1.0),
        });
        self.latest
    }

    /// Result of the last estimate.
    pub fn latest(&self) -> Option<Heartbeat> {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn sine(freq: f64, fs: f64, seconds: f64) -> Vec<f64> {
        (0..(fs * seconds) as usize)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn autocorrelation_of_flat_window_is_none() {
        assert!(autocorrelation(&[1.0; 100], 1, 50).is_none());
        assert!(autocorrelation(&[], 1, 50).is_none());
    }

    #[test]
    fn sine_period_is_recovered() {
        let mut estimator = PeriodicityEstimator::new(100.0, 0.1);
        let found = estimator.estimate(&sine(4.0, 100.0, 8.0)).expect("period");
        assert!((found.period_s - 0.25).abs() < 0.011, "{found:?}");
        assert!((found.frequency_hz - 4.0).abs() < 0.2);
        assert!(found.regularity > 0.9);
        assert!(found.jitter_s < 0.025);
        // lags 5..250 over the last 500 samples
        assert_eq!(estimator.curve().len(), 245);
    }

    #[test]
    fn short_history_yields_nothing() {
        let mut estimator = PeriodicityEstimator::new(100.0, 0.1);
        assert!(estimator.estimate(&sine(4.0, 100.0, 1.5)).is_none());
        assert!(estimator.curve().is_empty());
    }

    #[test]
    fn heartbeat_rate_is_recovered() {
        let mut estimator = HeartbeatEstimator::new(100.0, 0.15);
        let beat = estimator
            .estimate(&sine(72.0 / 60.0, 100.0, 10.0))
            .expect("heartbeat");
        assert!((beat.bpm - 72.0).abs() < 3.0, "{beat:?}");
        assert!(beat.confidence > 0.15 && beat.confidence <= 1.0);
        assert_eq!(estimator.latest(), Some(beat));
    }

    #[test]
    fn noise_has_no_heartbeat() {
        let mut rng = StdRng::seed_from_u64(7);
        let noise: Vec<f64> = (0..1000).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut estimator = HeartbeatEstimator::new(100.0, 0.15);
        assert!(estimator.estimate(&noise).is_none());
    }

    #[test]
    fn heartbeat_needs_five_seconds() {
        let mut estimator = HeartbeatEstimator::new(100.0, 0.15);
        assert!(estimator.estimate(&sine(1.2, 100.0, 4.9)).is_none());
    }
}
