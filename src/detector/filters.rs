//! Single-pole IIR stages used by the detector.
//!
//! All stages are first order and run one sample at a time; coefficients follow
//! the usual RC discretization.

use std::f64::consts::PI;

/// High-pass coefficient `α = fs / (fs + 2π·fc)`.
pub fn highpass_alpha(cutoff_hz: f64, fs: f64) -> f64 {
    fs / (fs + 2.0 * PI * cutoff_hz)
}

/// Low-pass coefficient `α = 2π·fc / (2π·fc + fs)`.
pub fn lowpass_alpha(cutoff_hz: f64, fs: f64) -> f64 {
    let w = 2.0 * PI * cutoff_hz;
    w / (w + fs)
}

/// First-order high-pass: `y[n] = α·(y[n-1] + x[n] - x[n-1])`.
#[derive(Debug, Clone)]
pub struct HighPass {
    alpha: f64,
    prev_in: f64,
    prev_out: f64,
}

impl HighPass {
    /// New stage with zeroed memory.
    pub fn new(cutoff_hz: f64, fs: f64) -> Self {
        Self {
            alpha: highpass_alpha(cutoff_hz, fs),
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    /// Seed the input memory so a constant `x` passes as zero.
    pub fn prime(&mut self, x: f64) {
        self.prev_in = x;
        self.prev_out = 0.0;
    }

    /// Filter one sample.
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.alpha * (self.prev_out + x - self.prev_in);
        self.prev_in = x;
        self.prev_out = y;
        y
    }

    /// The stage coefficient.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

/// First-order low-pass: `y[n] = α·x[n] + (1 - α)·y[n-1]`.
#[derive(Debug, Clone)]
pub struct LowPass {
    alpha: f64,
    prev: f64,
}

impl LowPass {
    /// New stage with zeroed memory.
    pub fn new(cutoff_hz: f64, fs: f64) -> Self {
        Self {
            alpha: lowpass_alpha(cutoff_hz, fs),
            prev: 0.0,
        }
    }

    /// Filter one sample.
    pub fn process(&mut self, x: f64) -> f64 {
        self.prev = self.alpha * x + (1.0 - self.alpha) * self.prev;
        self.prev
    }
}

/// High-pass followed by low-pass.
#[derive(Debug, Clone)]
pub struct BandPass {
    highpass: HighPass,
    lowpass: LowPass,
}

impl BandPass {
    /// Band between `low_hz` and `high_hz`.
    pub fn new(low_hz: f64, high_hz: f64, fs: f64) -> Self {
        Self {
            highpass: HighPass::new(low_hz, fs),
            lowpass: LowPass::new(high_hz, fs),
        }
    }

    /// Filter one sample.
    pub fn process(&mut self, x: f64) -> f64 {
        self.lowpass.process(self.highpass.process(x))
    }
}

/// Per-axis high-pass removing gravity from a 3-axis stream.
///
/// The first sample only seeds the filter memory and yields `None`.
#[derive(Debug, Clone)]
pub struct GravityFilter {
    axes: [HighPass; 3],
    primed: bool,
}

impl GravityFilter {
    /// Filter with the given cutoff at sample rate `fs`.
    pub fn new(cutoff_hz: f64, fs: f64) -> Self {
        let stage = HighPass::new(cutoff_hz, fs);
        Self {
            axes: [stage.clone(), stage.clone(), stage],
            primed: false,
        }
    }

    /// Filter one 3-axis sample; `None` for the priming sample.
    pub fn process(&mut self, sample: [f64; 3]) -> Option<[f64; 3]> {
        if !self.primed {
            for (stage, x) in self.axes.iter_mut().zip(sample) {
                stage.prime(x);
            }
            self.primed = true;
            return None;
        }
        Some([
            self.axes[0].process(sample[0]),
            self.axes[1].process(sample[1]),
            self.axes[2].process(sample[2]),
        ])
    }
}

/// Euclidean norm of a 3-vector.
pub fn magnitude(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
