//! Mock IMU
//!
//! Simulated accelerometer + gyroscope for running the full pipeline without
//! hardware. Reports are produced in real time at the native rate from a seeded
//! generator, so two runs with the same seed yield identical sample sequences.
//!
//! # Signal model
//!
//! - Accelerometer: gravity on -Z, uniform noise of ±50 µg per axis, and an
//!   occasional tap (a decaying 60 Hz ring-down of 20–80 mg) every 4–12 s.
//! - Gyroscope: uniform noise of ±0.05 deg/s plus a slow 0.1 Hz sway on X.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use super::{encode_imu_report, Report, SensorChannel, SensorSource};
use crate::error::{AppResult, MotionError};
use crate::transport::ring::RawSample;

/// Upper bound on reports generated per channel by a single poll.
const MAX_REPORTS_PER_POLL: u64 = 4096;

const ACCEL_NOISE_G: f64 = 5e-5;
const GYRO_NOISE_DPS: f64 = 0.05;
const TAP_FREQ_HZ: f64 = 60.0;
const TAP_DECAY_S: f64 = 0.015;

#[derive(Debug, Clone, Copy)]
struct Tap {
    start: u64,
    amplitude: f64,
}

/// Simulated 3-axis IMU.
pub struct MockImu {
    native_rate_hz: f64,
    rng: StdRng,
    opened_at: Option<Instant>,
    emitted: u64,
    next_tap: u64,
    tap: Option<Tap>,
}

impl MockImu {
    /// Mock IMU at `native_rate_hz`, seeded for reproducible noise.
    pub fn new(native_rate_hz: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let rate = native_rate_hz.max(1.0);
        let next_tap = (rng.gen_range(4.0..12.0) * rate) as u64;
        Self {
            native_rate_hz: rate,
            rng,
            opened_at: None,
            emitted: 0,
            next_tap,
            tap: None,
        }
    }

    /// Samples generated so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Produce the next accelerometer and gyroscope sample pair, in g and deg/s.
    pub fn next_sample(&mut self) -> ([f64; 3], [f64; 3]) {
        let index = self.emitted;
        self.emitted += 1;
        let t = index as f64 / self.native_rate_hz;

        if index >= self.next_tap {
            self.tap = Some(Tap {
                start: index,
                amplitude: self.rng.gen_range(0.02..0.08),
            });
            self.next_tap = index + (self.rng.gen_range(4.0..12.0) * self.native_rate_hz) as u64;
        }

        let mut impulse = 0.0;
        if let Some(tap) = self.tap {
            let dt = (index - tap.start) as f64 / self.native_rate_hz;
            if dt > 8.0 * TAP_DECAY_S {
                self.tap = None;
            } else {
                impulse = tap.amplitude * (-dt / TAP_DECAY_S).exp() * (2.0 * PI * TAP_FREQ_HZ * dt).cos();
            }
        }

        let accel = [
            self.rng.gen_range(-ACCEL_NOISE_G..ACCEL_NOISE_G),
            self.rng.gen_range(-ACCEL_NOISE_G..ACCEL_NOISE_G),
            -1.0 + impulse + self.rng.gen_range(-ACCEL_NOISE_G..ACCEL_NOISE_G),
        ];
        let gyro = [
            2.0 * (2.0 * PI * 0.1 * t).sin() + self.rng.gen_range(-GYRO_NOISE_DPS..GYRO_NOISE_DPS),
            self.rng.gen_range(-GYRO_NOISE_DPS..GYRO_NOISE_DPS),
            self.rng.gen_range(-GYRO_NOISE_DPS..GYRO_NOISE_DPS),
        ];
        (accel, gyro)
    }

    fn due(&self, opened_at: Instant) -> u64 {
        (opened_at.elapsed().as_secs_f64() * self.native_rate_hz) as u64
    }
}

impl SensorSource for MockImu {
    fn open(&mut self) -> AppResult<()> {
        self.opened_at = Some(Instant::now());
        self.emitted = 0;
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> AppResult<Vec<Report>> {
        let opened_at = self
            .opened_at
            .ok_or_else(|| MotionError::Hardware("mock IMU polled before open".to_string()))?;

        let mut due = self.due(opened_at);
        if due <= self.emitted {
            let period = Duration::from_secs_f64(1.0 / self.native_rate_hz);
            std::thread::sleep(period.min(timeout));
            due = self.due(opened_at);
        }
        if due > self.emitted + MAX_REPORTS_PER_POLL {
            // Fell too far behind; skip ahead like a device dropping reports.
            self.emitted = due - MAX_REPORTS_PER_POLL;
        }

        let mut reports = Vec::with_capacity(2 * due.saturating_sub(self.emitted) as usize);
        while self.emitted < due {
            let timestamp = self.emitted as f64 / self.native_rate_hz;
            let (accel, gyro) = self.next_sample();
            reports.push(Report {
                timestamp,
                channel: SensorChannel::Accelerometer,
                bytes: encode_imu_report(RawSample::from_units(accel)),
            });
            reports.push(Report {
                timestamp,
                channel: SensorChannel::Gyroscope,
                bytes: encode_imu_report(RawSample::from_units(gyro)),
            });
        }
        Ok(reports)
    }

    fn close(&mut self) {
        self.opened_at = None;
    }

    fn native_rate_hz(&self) -> f64 {
        self.native_rate_hz
    }
}
