//! Level-to-tone mapping and phase-continuous sine rendering.

use std::f64::consts::TAU;

use crate::error::{AppResult, MotionError};

/// Tone output parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneConfig {
    /// Output sample rate in Hz
    pub sample_rate: f64,
    /// Frequency at level 0
    pub low_hz: f64,
    /// Frequency at level 1
    pub high_hz: f64,
    /// Amplitude at level 0
    pub quiet: f64,
    /// Amplitude at level 1
    pub loud: f64,
}

impl ToneConfig {
    /// Validated config; swapped bounds are put back in order.
    pub fn new(sample_rate: f64, low_hz: f64, high_hz: f64, quiet: f64, loud: f64) -> AppResult<Self> {
        if !(sample_rate > 0.0) {
            return Err(MotionError::Configuration("--rate must be > 0".to_string()));
        }
        if !(low_hz > 0.0 && high_hz > 0.0) {
            return Err(MotionError::Configuration(
                "--low-hz and --high-hz must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&quiet) || !(0.0..=1.0).contains(&loud) {
            return Err(MotionError::Configuration(
                "--low-volume and --high-volume must be in 0..1".to_string(),
            ));
        }
        Ok(Self {
            sample_rate,
            low_hz: low_hz.min(high_hz),
            high_hz: low_hz.max(high_hz),
            quiet: quiet.min(loud),
            loud: quiet.max(loud),
        })
    }

    /// Frames rendered per 20 ms chunk (at least 64).
    pub fn chunk_frames(&self) -> usize {
        ((self.sample_rate * 0.02).round() as usize).max(64)
    }
}

/// Maps a `0..1` level onto frequency and amplitude.
#[derive(Debug, Clone, Copy)]
pub struct ToneMapper {
    config: ToneConfig,
}

impl ToneMapper {
    /// Mapper over a validated config.
    pub fn new(config: ToneConfig) -> Self {
        Self { config }
    }

    /// The config this mapper was built from.
    pub fn config(&self) -> &ToneConfig {
        &self.config
    }

    /// `(frequency_hz, amplitude)` for `level`, clamped to `0..1`.
    pub fn map(&self, level: f64) -> (f64, f64) {
        let n = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        let c = &self.config;
        (
            c.low_hz + (c.high_hz - c.low_hz) * n,
            c.quiet + (c.loud - c.quiet) * n,
        )
    }
}

/// Sine synthesizer that ramps frequency and amplitude across each chunk.
#[derive(Debug, Clone)]
pub struct ToneSynth {
    mapper: ToneMapper,
    sample_rate: f64,
    phase: f64,
    last_freq: f64,
    last_amp: f64,
}

impl ToneSynth {
    /// Synth starting silent at the low frequency.
    pub fn new(mapper: ToneMapper) -> Self {
        let config = *mapper.config();
        Self {
            mapper,
            sample_rate: config.sample_rate.max(1.0),
            phase: 0.0,
            last_freq: config.low_hz,
            last_amp: config.quiet,
        }
    }

    /// Render `frames` samples moving linearly from the previous target to the one for `level`.
    pub fn render(&mut self, level: f64, frames: usize) -> Vec<f32> {
        let n = frames.max(1);
        let (freq, amp) = self.mapper.map(level);
        let span = (n - 1).max(1) as f64;

        let mut phase = self.phase;
        let out = (0..n)
            .map(|i| {
                let t = i as f64 / span;
                let f = self.last_freq + (freq - self.last_freq) * t;
                let a = self.last_amp + (amp - self.last_amp) * t;
                phase += TAU * f / self.sample_rate;
                (a * phase.sin()) as f32
            })
            .collect();

        self.phase = phase.rem_euclid(TAU);
        self.last_freq = freq;
        self.last_amp = amp;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ToneConfig {
        ToneConfig::new(24_000.0, 500.0, 5_000.0, 0.02, 0.7).unwrap()
    }

    #[test]
    fn swapped_bounds_are_ordered() {
        let c = ToneConfig::new(8_000.0, 900.0, 100.0, 0.9, 0.1).unwrap();
        assert_eq!((c.low_hz, c.high_hz), (100.0, 900.0));
        assert_eq!((c.quiet, c.loud), (0.1, 0.9));
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(ToneConfig::new(0.0, 1.0, 2.0, 0.0, 1.0).is_err());
        assert!(ToneConfig::new(100.0, 0.0, 2.0, 0.0, 1.0).is_err());
        assert!(ToneConfig::new(100.0, 1.0, 2.0, 0.0, 1.5).is_err());
    }

    #[test]
    fn mapper_interpolates_and_clamps() {
        let m = ToneMapper::new(config());
        assert_eq!(m.map(0.0), (500.0, 0.02));
        let (f, a) = m.map(0.5);
        assert!((f - 2750.0).abs() < 1e-9 && (a - 0.36).abs() < 1e-9);
        assert_eq!(m.map(7.0), m.map(1.0));
    }

    #[test]
    fn chunk_is_twenty_ms() {
        assert_eq!(config().chunk_frames(), 480);
        assert_eq!(ToneConfig::new(100.0, 1.0, 2.0, 0.0, 1.0).unwrap().chunk_frames(), 64);
    }

    #[test]
    fn synth_is_phase_continuous() {
        let mut synth = ToneSynth::new(ToneMapper::new(config()));
        let a = synth.render(0.0, 480);
        let b = synth.render(0.0, 480);
        assert_eq!(a.len(), 480);
        // one sample step at 500 Hz / 24 kHz stays small across the chunk boundary
        let jump = (b[0] - a[479]).abs();
        assert!(jump < 0.02 * 0.14, "jump {jump}");
        assert!(a.iter().chain(&b).all(|s| s.abs() <= 0.02 + 1e-6));
    }

    #[test]
    fn amplitude_ramps_toward_target() {
        let mut synth = ToneSynth::new(ToneMapper::new(config()));
        let out = synth.render(1.0, 2400);
        let early = out[..240].iter().fold(0f32, |m, s| m.max(s.abs()));
        let late = out[2160..].iter().fold(0f32, |m, s| m.max(s.abs()));
        assert!(early < 0.1 && late > 0.5, "early {early} late {late}");
    }
}
