//! Rolling kurtosis for impulsive content.

use super::window::RollingWindow;

/// Minimum number of samples in the window before kurtosis is evaluated.
pub const MIN_SAMPLES: usize = 50;

/// Moment ratio `m4 / m2²` of `values` (about 3 for Gaussian data).
pub fn kurtosis(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let (m2, m4) = values.iter().fold((0.0, 0.0), |(m2, m4), &x| {
        let d = x - mean;
        let d2 = d * d;
        (m2 + d2, m4 + d2 * d2)
    });
    let (m2, m4) = (m2 / n, m4 / n);
    m4 / (m2 * m2 + 1e-30)
}

/// Kurtosis over a rolling window, evaluated every `every` samples.
#[derive(Debug, Clone)]
pub struct KurtosisDetector {
    window: RollingWindow,
    every: u64,
    threshold: f64,
    counter: u64,
    value: f64,
}

impl KurtosisDetector {
    /// Window of `window_len` samples, firing when kurtosis exceeds `threshold`.
    pub fn new(window_len: usize, every: u64, threshold: f64) -> Self {
        Self {
            window: RollingWindow::new(window_len),
            every: every.max(1),
            threshold,
            counter: 0,
            value: 3.0,
        }
    }

    /// Push one value; `true` when an evaluation ran and exceeded the threshold.
    pub fn push(&mut self, x: f64) -> bool {
        self.window.push(x);
        self.counter += 1;
        if self.counter < self.every || self.window.len() < MIN_SAMPLES {
            return false;
        }
        self.counter = 0;

        let values: Vec<f64> = self.window.iter().copied().collect();
        self.value = kurtosis(&values);
        self.value > self.threshold
    }

    /// Last evaluated kurtosis (3.0 before the first evaluation).
    pub fn value(&self) -> f64 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn gaussian(rng: &mut StdRng) -> f64 {
        // Box-Muller
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    #[test]
    fn gaussian_is_about_three() {
        let mut rng = StdRng::seed_from_u64(17);
        let values: Vec<f64> = (0..20_000).map(|_| gaussian(&mut rng)).collect();
        let k = kurtosis(&values);
        assert!((k - 3.0).abs() < 0.2, "kurtosis {k}");
    }

    #[test]
    fn gaussian_window_never_fires() {
        let mut rng = StdRng::seed_from_u64(23);
        let mut detector = KurtosisDetector::new(100, 10, 6.0);
        let fired = (0..3000)
            .filter(|_| detector.push(1e-4 * gaussian(&mut rng)))
            .count();
        assert_eq!(fired, 0);
        assert!(detector.value() < 6.0);
    }

    #[test]
    fn single_spike_fires() {
        let mut rng = StdRng::seed_from_u64(29);
        let mut detector = KurtosisDetector::new(100, 10, 6.0);
        for _ in 0..95 {
            detector.push(1e-4 * gaussian(&mut rng));
        }
        detector.push(0.05);
        let fired = (0..10).any(|_| detector.push(1e-4 * gaussian(&mut rng)));
        assert!(fired);
        assert!(detector.value() > 6.0);
    }

    #[test]
    fn waits_for_minimum_history() {
        let mut detector = KurtosisDetector::new(100, 10, 6.0);
        for _ in 0..49 {
            assert!(!detector.push(0.0));
        }
        assert_eq!(detector.value(), 3.0);
        detector.push(1.0);
        // evaluated at the 50th sample
        assert!(detector.value() > 6.0);
    }
}
