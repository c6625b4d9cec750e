//! Producer-side keep-one-in-N decimation.

/// Keep-one-in-N factor for the given rates: `max(1, floor(native / output))`.
///
/// Non-positive or non-finite rates fall back to 1 (no decimation).
pub fn decimation_factor(native_rate_hz: f64, output_rate_hz: f64) -> u32 {
    if !(native_rate_hz > 0.0) || !(output_rate_hz > 0.0) {
        return 1;
    }
    let ratio = (native_rate_hz / output_rate_hz).floor();
    if ratio.is_finite() && ratio >= 1.0 {
        ratio.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

/// Per-channel decimation counter. Every `factor`-th offered sample is kept.
#[derive(Debug, Clone)]
pub struct SampleDecimator {
    factor: u32,
    counter: u32,
}

impl SampleDecimator {
    /// Decimator keeping one sample in `factor` (0 is treated as 1).
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
            counter: 0,
        }
    }

    /// Decimator for a native/output rate pair.
    pub fn for_rates(native_rate_hz: f64, output_rate_hz: f64) -> Self {
        Self::new(decimation_factor(native_rate_hz, output_rate_hz))
    }

    /// The configured factor.
    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Count one raw sample; `true` when it should be forwarded.
    pub fn accept(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.factor {
            self.counter = 0;
            true
        } else {
            false
        }
    }
}
