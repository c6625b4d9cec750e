//! Streaming linear-interpolation resampler.

use crate::error::{AppResult, MotionError};

/// Converts a mono stream from one rate to another by linear interpolation.
///
/// Input is buffered across calls; an output sample is produced whenever the
/// read position has a right-hand neighbour, so the last input sample of a
/// call is held until more input arrives.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    step: f64,
    buf: Vec<f32>,
    pos: f64,
}

impl LinearResampler {
    /// Resampler from `input_rate` to `output_rate`; both must be positive.
    pub fn new(input_rate: f64, output_rate: f64) -> AppResult<Self> {
        if !(input_rate > 0.0 && output_rate > 0.0) {
            return Err(MotionError::Configuration(format!(
                "sample rates must be > 0 (input {input_rate}, output {output_rate})"
            )));
        }
        Ok(Self {
            step: input_rate / output_rate,
            buf: Vec::new(),
            pos: 0.0,
        })
    }

    /// Input samples consumed per output sample.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Feed input and return every output sample now computable.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.buf.extend_from_slice(samples);
        if self.buf.len() < 2 {
            return Vec::new();
        }

        let max_pos = (self.buf.len() - 1) as f64;
        let mut out = Vec::with_capacity((max_pos / self.step) as usize + 1);
        while self.pos < max_pos {
            let i = self.pos as usize;
            let frac = self.pos - i as f64;
            let (a, b) = (f64::from(self.buf[i]), f64::from(self.buf[i + 1]));
            out.push((a + (b - a) * frac) as f32);
            self.pos += self.step;
        }

        let trim = (self.pos as usize).min(self.buf.len());
        if trim > 0 {
            self.buf.drain(..trim);
            self.pos -= trim as f64;
        }
        out
    }
}

/// Resampler for `input_rate → output_rate`, or `None` when the rates already match.
pub fn resampler_for(input_rate: f64, output_rate: f64) -> AppResult<Option<LinearResampler>> {
    if (input_rate - output_rate).abs() <= 1e-6 {
        Ok(None)
    } else {
        LinearResampler::new(input_rate, output_rate).map(Some)
    }
}
