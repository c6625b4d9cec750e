//! Mahony AHRS fusing accelerometer and gyroscope samples.
//!
//! The accelerometer reads gravity as `-Z` when the device lies flat. Yaw has no
//! absolute reference and is relative to the attitude at start-up.

use serde::Serialize;

/// Proportional gain on the gravity error (rad/s per rad).
pub const KP: f64 = 1.0;

/// Integral gain on the gravity error.
pub const KI: f64 = 0.05;

/// Accelerometer samples with a norm below this (g) are ignored.
pub const ACCEL_GATE_G: f64 = 0.3;

/// Shortest integration step in seconds.
pub const MIN_DT: f64 = 0.001;
/// Longest integration step in seconds; longer gaps are treated as this.
pub const MAX_DT: f64 = 0.05;

/// Step assumed for the first update.
pub const FIRST_DT: f64 = 0.01;

/// Roll, pitch and yaw in degrees (aerospace ZYX sequence).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EulerAngles {
    /// Rotation about X
    pub roll: f64,
    /// Rotation about Y
    pub pitch: f64,
    /// Rotation about Z
    pub yaw: f64,
}

/// Orientation axis selectable for tone output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Rotation about the body X axis
    Roll,
    /// Rotation about the body Y axis
    Pitch,
    /// Rotation about the body Z axis
    Yaw,
}

impl EulerAngles {
    /// Angle for one axis, in degrees.
    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Roll => self.roll,
            Axis::Pitch => self.pitch,
            Axis::Yaw => self.yaw,
        }
    }
}

/// Mahony complementary filter state.
#[derive(Debug, Clone)]
pub struct Mahony {
    q: [f64; 4],
    integral: [f64; 3],
    gyro_dps: [f64; 3],
    initialized: bool,
}

impl Default for Mahony {
    fn default() -> Self {
        Self::new()
    }
}

impl Mahony {
    /// Identity attitude; the first accelerometer sample levels it.
    pub fn new() -> Self {
        Self {
            q: [1.0, 0.0, 0.0, 0.0],
            integral: [0.0; 3],
            gyro_dps: [0.0; 3],
            initialized: false,
        }
    }

    /// Record the latest angular rate in deg/s, used by the next accelerometer update.
    pub fn set_gyro(&mut self, gyro_dps: [f64; 3]) {
        self.gyro_dps = gyro_dps;
    }

    /// Angular rate last set, in deg/s.
    pub fn gyro(&self) -> [f64; 3] {
        self.gyro_dps
    }

    /// Whether an accelerometer sample has set the attitude.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Unit quaternion `[w, x, y, z]`.
    pub fn quaternion(&self) -> [f64; 4] {
        self.q
    }

    /// Fuse one accelerometer sample (g) over `dt` seconds.
    ///
    /// The first sample above the gate sets roll and pitch directly from
    /// gravity. Returns `false` when the sample was gated out.
    pub fn update(&mut self, accel: [f64; 3], dt: f64) -> bool {
        let norm = (accel[0] * accel[0] + accel[1] * accel[1] + accel[2] * accel[2]).sqrt();
        if !(norm >= ACCEL_GATE_G) {
            return false;
        }
        // measured "up" in the body frame
        let up = [-accel[0] / norm, -accel[1] / norm, -accel[2] / norm];

        if !self.initialized {
            let roll = up[1].atan2(up[2]);
            let pitch = (-up[0]).atan2((up[1] * up[1] + up[2] * up[2]).sqrt());
            let (sr, cr) = (roll * 0.5).sin_cos();
            let (sp, cp) = (pitch * 0.5).sin_cos();
            self.q = [cr * cp, sr * cp, cr * sp, -sr * sp];
            self.initialized = true;
            return true;
        }

        let [qw, qx, qy, qz] = self.q;
        // estimated "up" from the current attitude
        let v = [
            2.0 * (qx * qz - qw * qy),
            2.0 * (qw * qx + qy * qz),
            qw * qw - qx * qx - qy * qy + qz * qz,
        ];
        let e = [
            up[1] * v[2] - up[2] * v[1],
            up[2] * v[0] - up[0] * v[2],
            up[0] * v[1] - up[1] * v[0],
        ];

        let mut g = [0.0; 3];
        for i in 0..3 {
            self.integral[i] += KI * e[i] * dt;
            g[i] = self.gyro_dps[i].to_radians() + KP * e[i] + self.integral[i];
        }

        let h = 0.5 * dt;
        let mut q = [
            qw + (-qx * g[0] - qy * g[1] - qz * g[2]) * h,
            qx + (qw * g[0] + qy * g[2] - qz * g[1]) * h,
            qy + (qw * g[1] - qx * g[2] + qz * g[0]) * h,
            qz + (qw * g[2] + qx * g[1] - qy * g[0]) * h,
        ];
        let n = q.iter().map(|c| c * c).sum::<f64>().sqrt();
        if n > 0.0 {
            q.iter_mut().for_each(|c| *c /= n);
            self.q = q;
        }
        true
    }

    /// Current attitude as Euler angles.
    pub fn euler(&self) -> EulerAngles {
        let [qw, qx, qy, qz] = self.q;
        let roll = (2.0 * (qw * qx + qy * qz)).atan2(1.0 - 2.0 * (qx * qx + qy * qy));
        let pitch = (2.0 * (qw * qy - qz * qx)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (qw * qz + qx * qy)).atan2(1.0 - 2.0 * (qy * qy + qz * qz));
        EulerAngles {
            roll: roll.to_degrees(),
            pitch: pitch.to_degrees(),
            yaw: yaw.to_degrees(),
        }
    }
}

/// Integration step from successive wall-clock readings.
#[derive(Debug, Clone, Default)]
pub struct StepClock {
    last: Option<f64>,
}

impl StepClock {
    /// Seconds since the previous call, clamped; [`FIRST_DT`] on the first call.
    pub fn step(&mut self, now: f64) -> f64 {
        let dt = match self.last {
            None => FIRST_DT,
            Some(last) => (now - last).clamp(MIN_DT, MAX_DT),
        };
        self.last = Some(now);
        dt
    }
}

/// Angle folded into `[0, 360)` and scaled to a `0..1` level.
pub fn angle_level(angle_deg: f64) -> f64 {
    (angle_deg + 360.0).rem_euclid(360.0) / 360.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tilted(roll_deg: f64, pitch_deg: f64) -> [f64; 3] {
        let (r, p) = (roll_deg.to_radians(), pitch_deg.to_radians());
        // gravity (down) in the body frame
        [p.sin(), -r.sin() * p.cos(), -r.cos() * p.cos()]
    }

    #[test]
    fn first_sample_sets_attitude() {
        let mut ahrs = Mahony::new();
        assert!(ahrs.update(tilted(30.0, 0.0), 0.01));
        let e = ahrs.euler();
        assert!((e.roll - 30.0).abs() < 1e-9, "{e:?}");
        assert!(e.pitch.abs() < 1e-9);

        let mut ahrs = Mahony::new();
        ahrs.update(tilted(0.0, -20.0), 0.01);
        assert!((ahrs.euler().pitch + 20.0).abs() < 1e-9);
    }

    #[test]
    fn weak_accel_is_gated() {
        let mut ahrs = Mahony::new();
        assert!(!ahrs.update([0.0, 0.1, 0.1], 0.01));
        assert!(!ahrs.update([f64::NAN, 0.0, 1.0], 0.01));
        assert!(!ahrs.is_initialized());
    }

    #[test]
    fn converges_to_new_tilt() {
        let mut ahrs = Mahony::new();
        ahrs.update(tilted(0.0, 0.0), 0.01);
        for _ in 0..1500 {
            ahrs.update(tilted(20.0, 10.0), 0.01);
        }
        let e = ahrs.euler();
        assert!((e.roll - 20.0).abs() < 0.5, "{e:?}");
        assert!((e.pitch - 10.0).abs() < 0.5, "{e:?}");
    }

    #[test]
    fn gyro_integrates_yaw() {
        let mut ahrs = Mahony::new();
        ahrs.update(tilted(0.0, 0.0), 0.01);
        ahrs.set_gyro([0.0, 0.0, 90.0]);
        for _ in 0..100 {
            ahrs.update(tilted(0.0, 0.0), 0.01);
        }
        let e = ahrs.euler();
        assert!((e.yaw - 90.0).abs() < 0.5, "{e:?}");
        assert!(e.roll.abs() < 0.1);
    }

    #[test]
    fn step_clock_clamps() {
        let mut clock = StepClock::default();
        assert_eq!(clock.step(10.0), FIRST_DT);
        assert_eq!(clock.step(10.0), MIN_DT);
        assert_eq!(clock.step(11.0), MAX_DT);
        assert!((clock.step(11.02) - 0.02).abs() < 1e-9);
    }

    #[test]
    fn level_wraps_negative_angles() {
        assert!((angle_level(-90.0) - 0.75).abs() < 1e-12);
        assert_eq!(angle_level(0.0), 0.0);
        assert!((angle_level(180.0) - 0.5).abs() < 1e-12);
    }
}
