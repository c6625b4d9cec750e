//! Sensor Capabilities
//!
//! The sampling producer talks to hardware through one small capability,
//! [`SensorSource`]: open the device, poll for raw input reports, close it. A
//! report is the untouched byte payload of one HID input report tagged with the
//! channel it came from; decoding happens in [`parse_imu_report`].
//!
//! # IMU report format
//!
//! ```text
//! 22 bytes: [6-byte preamble] [x: i32 LE] [y: i32 LE] [z: i32 LE] [4 bytes trailer]
//! ```
//!
//! Values are fixed point, physical units x 65536 (g for the accelerometer, deg/s
//! for the gyroscope).
//!
//! # Example
//!
//! ```rust,ignore
//! let mut source = hardware::open_source("mock", 800.0, 7)?;
//! source.open()?;
//! for report in source.poll(Duration::from_millis(10))? {
//!     if let Some(sample) = parse_imu_report(&report.bytes) {
//!         // forward to the ring
//!     }
//! }
//! source.close();
//! ```

pub mod mock;
pub mod producer;

use crate::error::{AppResult, MotionError};
use crate::transport::ring::RawSample;
use std::time::Duration;

pub use mock::MockImu;

/// Length of an IMU input report.
pub const IMU_REPORT_LEN: usize = 22;

/// Offset of the x component inside an IMU report; y and z follow.
pub const IMU_DATA_OFFSET: usize = 6;

/// Which sensor a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorChannel {
    /// 3-axis accelerometer, g
    Accelerometer,
    /// 3-axis gyroscope, deg/s
    Gyroscope,
}

/// One raw input report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Seconds since the source was opened.
    pub timestamp: f64,
    /// Originating channel.
    pub channel: SensorChannel,
    /// Raw report payload.
    pub bytes: Vec<u8>,
}

/// Hardware capability producing raw IMU reports at a fixed native rate.
///
/// Implementations are driven from a single thread inside the producer process,
/// so the trait is synchronous and only requires `Send`.
pub trait SensorSource: Send {
    /// Acquire the device and start report delivery.
    fn open(&mut self) -> AppResult<()>;

    /// Collect reports that arrived since the last poll, waiting at most `timeout`
    /// when none are pending. An empty vector is a normal result.
    fn poll(&mut self, timeout: Duration) -> AppResult<Vec<Report>>;

    /// Stop delivery and release the device. Idempotent.
    fn close(&mut self);

    /// Native report rate in Hz.
    fn native_rate_hz(&self) -> f64;
}

/// Decode the x/y/z payload of an IMU report. Reports of any other length are rejected.
pub fn parse_imu_report(bytes: &[u8]) -> Option<RawSample> {
    if bytes.len() != IMU_REPORT_LEN {
        return None;
    }
    let word = |offset: usize| {
        let start = IMU_DATA_OFFSET + offset;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[start..start + 4]);
        i32::from_le_bytes(raw)
    };
    Some(RawSample::new(word(0), word(4), word(8)))
}

/// Encode a sample as an IMU report (used by the mock source and tests).
pub fn encode_imu_report(sample: RawSample) -> Vec<u8> {
    let mut bytes = vec![0u8; IMU_REPORT_LEN];
    bytes[IMU_DATA_OFFSET..IMU_DATA_OFFSET + 4].copy_from_slice(&sample.x.to_le_bytes());
    bytes[IMU_DATA_OFFSET + 4..IMU_DATA_OFFSET + 8].copy_from_slice(&sample.y.to_le_bytes());
    bytes[IMU_DATA_OFFSET + 8..IMU_DATA_OFFSET + 12].copy_from_slice(&sample.z.to_le_bytes());
    bytes
}

/// Instantiate a sensor source by selector.
pub fn open_source(selector: &str, native_rate_hz: f64, seed: u64) -> AppResult<Box<dyn SensorSource>> {
    match selector {
        "mock" => Ok(Box::new(MockImu::new(native_rate_hz, seed))),
        other => Err(MotionError::Hardware(format!(
            "Unknown sensor source '{other}' (available: mock)"
        ))),
    }
}
