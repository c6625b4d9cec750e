//! Integration tests for the shared-memory sample ring.

use std::sync::atomic::AtomicBool;

use motion_daq::hardware::producer::{run_until, ProducerArgs};
use motion_daq::transport::{RawSample, ReadCursor, RingBuffer};

fn sample(i: i32) -> RawSample {
    RawSample::new(i, -i, i * 2)
}

#[test]
fn test_reads_back_everything_below_capacity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ring = RingBuffer::create(&dir.path().join("r.ring"), 64).expect("create");
    for i in 0..50 {
        ring.write(sample(i));
    }

    let batch = ring.read_new(0);
    assert_eq!(batch.total, 50);
    assert_eq!(batch.lost, 0);
    assert_eq!(batch.samples, (0..50).map(sample).collect::<Vec<_>>());

    let again = ring.read_new(batch.total);
    assert!(again.samples.is_empty());
    assert_eq!(again.total, 50);
}

#[test]
fn test_overrun_returns_newest_capacity_samples() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ring = RingBuffer::create(&dir.path().join("r.ring"), 16).expect("create");
    for i in 0..40 {
        ring.write(sample(i));
    }

    let mut cursor = ReadCursor::new();
    let samples = cursor.poll(&ring, 100);
    assert_eq!(samples, (24..40).map(sample).collect::<Vec<_>>());
    assert_eq!(cursor.overruns(), 24);
    assert_eq!(cursor.last_total(), 40);
    assert!(cursor.poll(&ring, 100).is_empty());
}

#[test]
fn test_batch_cap_keeps_newest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ring = RingBuffer::create(&dir.path().join("r.ring"), 64).expect("create");
    for i in 0..30 {
        ring.write(sample(i));
    }

    let mut cursor = ReadCursor::new();
    let samples = cursor.poll(&ring, 10);
    assert_eq!(samples, (20..30).map(sample).collect::<Vec<_>>());
    assert_eq!(cursor.trimmed(), 20);
    assert_eq!(cursor.overruns(), 0);
}

#[test]
fn test_second_mapping_sees_writes_and_restart_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("r.ring");
    let writer = RingBuffer::create(&path, 32).expect("create");
    let reader = RingBuffer::open(&path).expect("open");
    assert_eq!(reader.capacity(), 32);

    writer.set_restart_count(3);
    for i in 0..5 {
        writer.write(sample(i));
    }
    assert_eq!(reader.restart_count(), 3);
    assert_eq!(reader.read_new(2).samples, (2..5).map(sample).collect::<Vec<_>>());
}

#[test]
fn test_unknown_source_fails_producer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let accel_path = dir.path().join("accel.ring");
    let _accel = RingBuffer::create(&accel_path, 16).expect("create");
    let args = ProducerArgs {
        accel_ring: accel_path,
        gyro_ring: None,
        restart_count: 0,
        decimate: 1,
        source: "hid".to_string(),
        native_rate: 800.0,
        seed: 0,
    };
    assert!(run_until(&args, &AtomicBool::new(false)).is_err());
}
