//! Band-energy spectrogram from a Daubechies-4 wavelet decomposition.
//!
//! The decomposition uses symmetric (half-sample) boundary extension, so
//! coefficient counts per level are `floor((n + 7) / 2)`. Band `j` holds the
//! mean squared detail coefficient of level `j + 1`, which covers roughly
//! `fs / 2^(j+2) .. fs / 2^(j+1)`.

use std::collections::VecDeque;

use super::window::RollingWindow;

/// db4 decomposition low-pass filter.
pub const DB4_DEC_LO: [f64; 8] = [
    -0.010597401784997278,
    0.032883011666982945,
    0.030841381835986965,
    -0.18703481171888114,
    -0.02798376941698385,
    0.6308807679295904,
    0.7148465705525415,
    0.23037781330885523,
];

/// db4 decomposition high-pass filter.
pub const DB4_DEC_HI: [f64; 8] = [
    -0.23037781330885523,
    0.7148465705525415,
    -0.6308807679295904,
    -0.02798376941698385,
    0.18703481171888114,
    0.030841381835986965,
    -0.032883011666982945,
    -0.010597401784997278,
];

/// Number of reported bands.
pub const BAND_COUNT: usize = 5;

/// Samples fed into one decomposition.
pub const MAX_INPUT: usize = 512;

/// Fewest samples worth decomposing.
pub const MIN_INPUT: usize = 64;

/// Entries kept per band.
pub const HISTORY_LEN: usize = 50;

/// Mean over this many recent entries decides whether a band is active.
const ACTIVE_SPAN: usize = 3;

/// Band energy above which a band is reported on events.
const ACTIVE_ENERGY: f64 = 1e-10;

/// Deepest useful decomposition level for `n` samples and a filter of `filter_len` taps.
pub fn dwt_max_level(n: usize, filter_len: usize) -> usize {
    if filter_len < 2 {
        return 0;
    }
    let ratio = n / (filter_len - 1);
    if ratio == 0 {
        0
    } else {
        ratio.ilog2() as usize
    }
}

fn reflect(k: isize, n: isize) -> usize {
    let mut k = k;
    loop {
        if k < 0 {
            k = -k - 1;
        } else if k >= n {
            k = 2 * n - k - 1;
        } else {
            return k as usize;
        }
    }
}

/// One decomposition level: `(approximation, detail)`.
pub fn dwt(x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = x.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let taps = DB4_DEC_LO.len();
    let out_len = (n + taps - 1) / 2;
    let mut approx = Vec::with_capacity(out_len);
    let mut detail = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let o = (2 * i + 1) as isize;
        let (mut lo, mut hi) = (0.0, 0.0);
        for j in 0..taps {
            let v = x[reflect(o - j as isize, n as isize)];
            lo += DB4_DEC_LO[j] * v;
            hi += DB4_DEC_HI[j] * v;
        }
        approx.push(lo);
        detail.push(hi);
    }
    (approx, detail)
}

/// Multi-level decomposition, ordered `[cA_level, cD_level, …, cD_1]`.
pub fn wavedec(data: &[f64], level: usize) -> Vec<Vec<f64>> {
    let mut details = Vec::with_capacity(level);
    let mut approx = data.to_vec();
    for _ in 0..level {
        let (a, d) = dwt(&approx);
        details.push(d);
        approx = a;
    }
    let mut coeffs = Vec::with_capacity(level + 1);
    coeffs.push(approx);
    coeffs.extend(details.into_iter().rev());
    coeffs
}

/// Rolling band-energy history over the most recent magnitudes.
#[derive(Debug, Clone)]
pub struct BandEnergySpectrogram {
    buffer: RollingWindow,
    history: Vec<VecDeque<f64>>,
    labels: Vec<String>,
}

impl BandEnergySpectrogram {
    /// Spectrogram for a stream sampled at `fs`.
    pub fn new(fs: f64) -> Self {
        let labels = (0..BAND_COUNT)
            .map(|j| format!("{}Hz", (fs / f64::from(2u32 << j)) as u32))
            .collect();
        Self {
            buffer: RollingWindow::new(MAX_INPUT),
            history: (0..BAND_COUNT)
                .map(|_| VecDeque::with_capacity(HISTORY_LEN))
                .collect(),
            labels,
        }
    }

    /// Append one magnitude sample.
    pub fn push(&mut self, x: f64) {
        self.buffer.push(x);
    }

    /// Decompose the buffer and append one energy per band. `false` if skipped.
    pub fn update(&mut self) -> bool {
        let n = self.buffer.len();
        if n < MIN_INPUT {
            return false;
        }
        let level = dwt_max_level(n, DB4_DEC_LO.len()).min(BAND_COUNT);
        if level < 3 {
            return false;
        }

        let data = self.buffer.latest(MAX_INPUT);
        let coeffs = wavedec(&data, level);
        for (band, history) in self.history.iter_mut().enumerate() {
            // detail level band+1 sits at index level - band
            let energy = if band < level {
                let d = &coeffs[level - band];
                d.iter().map(|v| v * v).sum::<f64>() / d.len().max(1) as f64
            } else {
                0.0
            };
            if history.len() == HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(energy);
        }
        true
    }

    /// Band labels, highest frequency first.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Most recent energy per band (0 before the first update).
    pub fn latest(&self) -> [f64; BAND_COUNT] {
        let mut out = [0.0; BAND_COUNT];
        for (slot, history) in out.iter_mut().zip(&self.history) {
            *slot = history.back().copied().unwrap_or(0.0);
        }
        out
    }

    /// Full history of one band, oldest first.
    pub fn history(&self, band: usize) -> Option<&VecDeque<f64>> {
        self.history.get(band)
    }

    /// Labels of bands whose recent mean energy is non-negligible.
    pub fn active_bands(&self) -> Vec<String> {
        self.history
            .iter()
            .zip(&self.labels)
            .filter_map(|(history, label)| {
                if history.is_empty() {
                    return None;
                }
                let recent = history.iter().rev().take(ACTIVE_SPAN);
                let count = history.len().min(ACTIVE_SPAN) as f64;
                (recent.sum::<f64>() / count > ACTIVE_ENERGY).then(|| label.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn max_level_matches_filter_length() {
        assert_eq!(dwt_max_level(512, 8), 6);
        assert_eq!(dwt_max_level(64, 8), 3);
        assert_eq!(dwt_max_level(100, 8), 3);
        assert_eq!(dwt_max_level(5, 8), 0);
    }

    #[test]
    fn filters_are_quadrature_mirrors() {
        let lo_sum: f64 = DB4_DEC_LO.iter().sum();
        let hi_sum: f64 = DB4_DEC_HI.iter().sum();
        assert!((lo_sum - 2f64.sqrt()).abs() < 1e-12);
        assert!(hi_sum.abs() < 1e-12);
    }

    #[test]
    fn coefficient_lengths_follow_symmetric_mode() {
        let coeffs = wavedec(&vec![0.0; 512], 5);
        let lens: Vec<usize> = coeffs.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![22, 22, 37, 67, 131, 259]);
    }

    #[test]
    fn constant_signal_has_no_detail() {
        let (approx, detail) = dwt(&vec![2.0; 40]);
        assert!(detail.iter().all(|d| d.abs() < 1e-9));
        assert!(approx.iter().all(|a| (a - 2.0 * 2f64.sqrt()).abs() < 1e-9));
    }

    #[test]
    fn alternating_signal_lands_in_top_band() {
        let mut spectrogram = BandEnergySpectrogram::new(100.0);
        for i in 0..512 {
            spectrogram.push(if i % 2 == 0 { 0.01 } else { -0.01 });
        }
        assert!(spectrogram.update());
        let energy = spectrogram.latest();
        assert!(energy[0] > 1e-5);
        assert!(energy[1..].iter().all(|&e| e < energy[0] * 0.05));
        assert_eq!(spectrogram.active_bands()[0], "50Hz");
    }

    #[test]
    fn slow_sine_lands_in_low_bands() {
        let mut spectrogram = BandEnergySpectrogram::new(100.0);
        for i in 0..512 {
            spectrogram.push((2.0 * PI * 3.0 * i as f64 / 100.0).sin());
        }
        spectrogram.update();
        let energy = spectrogram.latest();
        assert!(energy[3].max(energy[4]) > 10.0 * energy[0]);
    }

    #[test]
    fn short_buffer_fills_only_available_levels() {
        let mut spectrogram = BandEnergySpectrogram::new(100.0);
        for i in 0..64 {
            spectrogram.push(if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        assert!(spectrogram.update());
        let energy = spectrogram.latest();
        assert!(energy[0] > 0.1);
        assert_eq!(energy[3], 0.0);
        assert_eq!(energy[4], 0.0);
    }

    #[test]
    fn labels_follow_sample_rate() {
        let spectrogram = BandEnergySpectrogram::new(100.0);
        assert_eq!(spectrogram.labels(), ["50Hz", "25Hz", "12Hz", "6Hz", "3Hz"]);
    }

    #[test]
    fn too_few_samples_skip_update() {
        let mut spectrogram = BandEnergySpectrogram::new(100.0);
        for _ in 0..63 {
            spectrogram.push(1.0);
        }
        assert!(!spectrogram.update());
        assert!(spectrogram.active_bands().is_empty());
    }
}
