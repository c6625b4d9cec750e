//! Peak detection against a robust (median / MAD) noise estimate.
//!
//! Also maintains the window's RMS, peak and crest factor for telemetry.

use serde::Serialize;

use super::window::RollingWindow;

/// Minimum number of samples in the window before evaluation.
pub const MIN_SAMPLES: usize = 50;

/// Scale from MAD to a Gaussian-equivalent sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Deviation tiers, in robust sigmas. Only the highest exceeded tier fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakTier {
    /// > 2 σ
    Micro,
    /// > 3.5 σ
    Medium,
    /// > 5 σ
    Strong,
    /// > 8 σ
    Major,
}

impl PeakTier {
    /// Highest tier exceeded by a deviation of `sigmas`.
    pub fn from_deviation(sigmas: f64) -> Option<Self> {
        if sigmas > 8.0 {
            Some(PeakTier::Major)
        } else if sigmas > 5.0 {
            Some(PeakTier::Strong)
        } else if sigmas > 3.5 {
            Some(PeakTier::Medium)
        } else if sigmas > 2.0 {
            Some(PeakTier::Micro)
        } else {
            None
        }
    }
}

/// Window statistics from the last evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PeakStats {
    /// Window median
    pub median: f64,
    /// Robust sigma actually used (after the floor)
    pub sigma: f64,
    /// Window RMS
    pub rms: f64,
    /// Largest absolute value in the window
    pub peak: f64,
    /// `peak / rms`
    pub crest: f64,
    /// Deviation of the evaluated sample, in sigmas
    pub deviation: f64,
}

/// Rolling median/MAD peak detector.
#[derive(Debug, Clone)]
pub struct PeakDetector {
    window: RollingWindow,
    every: u64,
    sigma_floor: f64,
    stats: PeakStats,
    scratch: Vec<f64>,
}

impl PeakDetector {
    /// Window of `window_len` samples evaluated when the sample count is a multiple of `every`.
    ///
    /// `sigma_floor` bounds the robust sigma from below. Deviations are measured
    /// in `max(1.4826 * MAD, sigma_floor)`, so in windows quieter than the floor a
    /// sample must clear `2 * sigma_floor` to reach the lowest tier. Pass `0.0`
    /// for the plain MAD estimate.
    pub fn new(window_len: usize, every: u64, sigma_floor: f64) -> Self {
        Self {
            window: RollingWindow::new(window_len),
            every: every.max(1),
            sigma_floor,
            stats: PeakStats {
                crest: 1.0,
                ..PeakStats::default()
            },
            scratch: Vec::with_capacity(window_len),
        }
    }

    /// Push `x`, the `sample_count`-th sample of the stream.
    pub fn push(&mut self, x: f64, sample_count: u64) -> Option<PeakTier> {
        self.window.push(x);
        if self.window.len() < MIN_SAMPLES || sample_count % self.every != 0 {
            return None;
        }

        self.scratch.clear();
        self.scratch.extend(self.window.iter().copied());
        let median = upper_median(&mut self.scratch);
        for v in self.scratch.iter_mut() {
            *v = (*v - median).abs();
        }
        let mad = upper_median(&mut self.scratch);
        let sigma = (MAD_TO_SIGMA * mad).max(self.sigma_floor) + 1e-30;

        let rms = self.window.rms();
        let peak = self.window.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        let deviation = (x - median).abs() / sigma;
        self.stats = PeakStats {
            median,
            sigma,
            rms,
            peak,
            crest: peak / (rms + 1e-30),
            deviation,
        };

        PeakTier::from_deviation(deviation)
    }

    /// Statistics from the last evaluation.
    pub fn stats(&self) -> PeakStats {
        self.stats
    }
}

/// Element at index `n / 2` of the sorted values (the upper median for even `n`).
fn upper_median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    *median
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_pick_highest() {
        assert_eq!(PeakTier::from_deviation(1.9), None);
        assert_eq!(PeakTier::from_deviation(2.1), Some(PeakTier::Micro));
        assert_eq!(PeakTier::from_deviation(4.0), Some(PeakTier::Medium));
        assert_eq!(PeakTier::from_deviation(5.5), Some(PeakTier::Strong));
        assert_eq!(PeakTier::from_deviation(100.0), Some(PeakTier::Major));
        assert!(PeakTier::Major > PeakTier::Micro);
    }

    #[test]
    fn upper_median_of_even_set() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(upper_median(&mut values), 3.0);
    }

    #[test]
    fn evaluates_only_on_stride() {
        let mut detector = PeakDetector::new(200, 10, 0.0003);
        for count in 1..=59u64 {
            detector.push(1e-4, count);
        }
        // 61 is off stride
        assert_eq!(detector.push(0.05, 61), None);
        assert_eq!(detector.stats().deviation, 0.0);
        assert_eq!(detector.push(0.05, 70), Some(PeakTier::Major));
    }

    #[test]
    fn sigma_floor_suppresses_quiet_noise() {
        let mut detector = PeakDetector::new(200, 10, 0.0003);
        let mut fired = 0;
        for count in 1..=1000u64 {
            let x = 5e-5 * (1.0 + ((count * 7919) % 13) as f64 / 13.0);
            if detector.push(x, count).is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 0);
        assert!((detector.stats().sigma - 0.0003).abs() < 1e-12);
    }

    /// Window with median `c` and MAD exactly `d`, then `x` evaluated at count 200.
    fn evaluate_after_window(sigma_floor: f64, c: f64, d: f64, x: f64) -> Option<PeakTier> {
        let mut detector = PeakDetector::new(200, 10, sigma_floor);
        for i in 0..199u64 {
            let step = match i % 4 {
                0 => -1.0,
                2 => 1.0,
                _ => 0.0,
            };
            detector.push(c + step * d, i + 1);
        }
        detector.push(x, 200)
    }

    #[test]
    fn floor_caps_tiers_only_below_floor() {
        // MAD sigma 1.11e-4 g: 6.3 sigma is Strong, but only 2.3 floor sigmas.
        assert_eq!(
            evaluate_after_window(0.0, 1e-4, 7.5e-5, 8e-4),
            Some(PeakTier::Strong)
        );
        assert_eq!(
            evaluate_after_window(0.0003, 1e-4, 7.5e-5, 8e-4),
            Some(PeakTier::Micro)
        );

        // MAD sigma 5.9e-4 g is above the floor, so the floor changes nothing.
        assert_eq!(
            evaluate_after_window(0.0, 1e-3, 4e-4, 3.5e-3),
            Some(PeakTier::Medium)
        );
        assert_eq!(
            evaluate_after_window(0.0003, 1e-3, 4e-4, 3.5e-3),
            Some(PeakTier::Medium)
        );
    }

    #[test]
    fn telemetry_reports_crest() {
        let mut detector = PeakDetector::new(100, 10, 1e-6);
        for count in 1..=99u64 {
            detector.push(if count % 2 == 0 { 1.0 } else { -1.0 }, count);
        }
        detector.push(4.0, 100);
        let stats = detector.stats();
        assert_eq!(stats.peak, 4.0);
        assert!(stats.crest > 3.0 && stats.crest < 4.0);
    }
}
