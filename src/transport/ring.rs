//! Memory-mapped ring buffer carrying 3-axis samples between processes.
//!
//! One producer process writes samples; one consumer process reads them. Neither
//! side takes a lock and the producer never blocks: a consumer that falls more than
//! `capacity` samples behind loses the oldest data and sees it as an overrun.
//!
//! # Memory Layout
//! ```text
//! [16-byte header] [capacity x 12-byte slots]
//!
//! Header (little-endian):
//!   offset  0  write_index:   u32  (next slot the producer writes)
//!   offset  4  total_written: u64  (monotonic sample count)
//!   offset 12  restart_count: u32  (producer respawns, diagnostics only)
//!
//! Slot:
//!   x: i32, y: i32, z: i32   (fixed point, units x 65536)
//! ```
//!
//! `total_written` sits at a 4-byte boundary, so it is stored as two aligned
//! 32-bit halves and read back until two consecutive loads agree.
#![allow(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, AtomicU32, Ordering};

/// Size of the ring header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Size of one encoded sample in bytes.
pub const SAMPLE_SIZE: usize = 12;

/// Default number of sample slots (10 s at the native 800 Hz).
pub const DEFAULT_CAPACITY: usize = 8000;

const WRITE_INDEX_OFFSET: usize = 0;
const TOTAL_LO_OFFSET: usize = 4;
const TOTAL_HI_OFFSET: usize = 8;
const RESTART_COUNT_OFFSET: usize = 12;

/// Fixed-point scale of [`RawSample`] components.
pub const FIXED_POINT_SCALE: f64 = 65536.0;

/// One raw 3-axis sample in sensor fixed point (physical units x 65536).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSample {
    /// X axis
    pub x: i32,
    /// Y axis
    pub y: i32,
    /// Z axis
    pub z: i32,
}

impl RawSample {
    /// Build a sample from raw fixed-point components.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Encode physical values (g or deg/s) into fixed point, saturating at the i32 range.
    pub fn from_units(values: [f64; 3]) -> Self {
        let to_fixed = |v: f64| (v * FIXED_POINT_SCALE).round() as i32;
        Self::new(to_fixed(values[0]), to_fixed(values[1]), to_fixed(values[2]))
    }

    /// Decode to physical units.
    pub fn to_units(self) -> [f64; 3] {
        [
            f64::from(self.x) / FIXED_POINT_SCALE,
            f64::from(self.y) / FIXED_POINT_SCALE,
            f64::from(self.z) / FIXED_POINT_SCALE,
        ]
    }

    fn encode(self) -> [u8; SAMPLE_SIZE] {
        let mut out = [0u8; SAMPLE_SIZE];
        out[0..4].copy_from_slice(&self.x.to_le_bytes());
        out[4..8].copy_from_slice(&self.y.to_le_bytes());
        out[8..12].copy_from_slice(&self.z.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let word = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self::new(word(0), word(4), word(8))
    }
}

/// Result of one consumer read.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadBatch {
    /// New samples, oldest first.
    pub samples: Vec<RawSample>,
    /// `total_written` the batch ends at; pass it to the next read.
    pub total: u64,
    /// Samples that existed but could not be returned (clamped or overwritten mid-copy).
    pub lost: u64,
}

/// Shared-memory sample ring.
///
/// # Safety
/// Holds a raw pointer into the mapping. Sound as long as:
/// - the mapping lives as long as the `RingBuffer` (it is owned here)
/// - only one process calls [`RingBuffer::write`] at a time
/// - header words are only touched through the atomic accessors below
pub struct RingBuffer {
    mmap: MmapMut,
    base: *mut u8,
    capacity: usize,
    path: PathBuf,
}

// SAFETY: header words are accessed atomically and slot copies are published with
// release/acquire ordering on the header.
unsafe impl Send for RingBuffer {}

// SAFETY: see above; the single-writer rule is a protocol contract, not a type one.
unsafe impl Sync for RingBuffer {}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("total_written", &self.total_written())
            .field("restart_count", &self.restart_count())
            .finish()
    }
}

impl RingBuffer {
    /// Create (or truncate) a ring file with `capacity` slots and a zeroed header.
    ///
    /// # Example
    /// ```no_run
    /// use std::path::Path;
    /// use motion_daq::transport::ring::{RawSample, RingBuffer};
    ///
    /// let ring = RingBuffer::create(Path::new("/dev/shm/motion_accel"), 8000).unwrap();
    /// ring.write(RawSample::new(0, 0, 65536));
    /// ```
    pub fn create(path: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(anyhow!("Invalid ring capacity: {capacity}"));
        }
        let total_size = HEADER_SIZE + capacity * SAMPLE_SIZE;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create ring file: {:?}", path))?;

        file.set_len(total_size as u64)
            .context("Failed to set ring file size")?;

        // SAFETY: file was just created with its final length; the mapping owns its view.
        let mut mmap = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .context("Failed to create memory mapping")?
        };
        mmap[..HEADER_SIZE].fill(0);
        let base = mmap.as_mut_ptr();

        Ok(Self {
            mmap,
            base,
            capacity,
            path: path.to_path_buf(),
        })
    }

    /// Attach to an existing ring file. Capacity is derived from the file length.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open ring file: {:?}", path))?;

        let len = file
            .metadata()
            .with_context(|| format!("Failed to stat ring file: {:?}", path))?
            .len() as usize;
        if len < HEADER_SIZE + SAMPLE_SIZE || (len - HEADER_SIZE) % SAMPLE_SIZE != 0 {
            return Err(anyhow!(
                "Ring file {:?} has inconsistent length {} (expected {} + n x {})",
                path,
                len,
                HEADER_SIZE,
                SAMPLE_SIZE
            ));
        }

        // SAFETY: the length was validated above; the creator never resizes the file.
        let mut mmap = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .context("Failed to map ring file")?
        };
        let base = mmap.as_mut_ptr();

        Ok(Self {
            mmap,
            base,
            capacity: (len - HEADER_SIZE) / SAMPLE_SIZE,
            path: path.to_path_buf(),
        })
    }

    fn header_word(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset + 4 <= HEADER_SIZE && offset % 4 == 0);
        // SAFETY: the mapping is page aligned and at least HEADER_SIZE long, so every
        // 4-byte header offset is a valid, aligned u32 for the lifetime of self.
        unsafe { &*(self.base.add(offset) as *const AtomicU32) }
    }

    // The u64 total sits at offset 4, which is not 8-aligned, so it is stored as
    // two u32 words: low then high. Loading high then low means a load that races
    // the 2^32 carry can only come out low (old high, new low), never ahead of the
    // slots actually written. A writer preempted between the two stores makes that
    // low value stable for a while, which the double read below cannot catch;
    // `ReadCursor::poll` ignores totals below what it has already consumed.
    fn load_total_once(&self) -> u64 {
        let hi = self.header_word(TOTAL_HI_OFFSET).load(Ordering::Acquire);
        let lo = self.header_word(TOTAL_LO_OFFSET).load(Ordering::Acquire);
        (u64::from(hi) << 32) | u64::from(lo)
    }

    /// Monotonic count of samples ever written to this ring.
    pub fn total_written(&self) -> u64 {
        let mut previous = self.load_total_once();
        loop {
            let current = self.load_total_once();
            if current == previous {
                return current;
            }
            previous = current;
        }
    }

    fn store_total(&self, total: u64) {
        self.header_word(TOTAL_LO_OFFSET)
            .store(total as u32, Ordering::Release);
        self.header_word(TOTAL_HI_OFFSET)
            .store((total >> 32) as u32, Ordering::Release);
    }

    /// Slot the producer writes next.
    pub fn write_index(&self) -> u32 {
        self.header_word(WRITE_INDEX_OFFSET).load(Ordering::Acquire)
    }

    /// Producer respawn counter.
    pub fn restart_count(&self) -> u32 {
        self.header_word(RESTART_COUNT_OFFSET).load(Ordering::Acquire)
    }

    /// Record the producer respawn counter. Consumer-side, before spawning.
    pub fn set_restart_count(&self, count: u32) {
        self.header_word(RESTART_COUNT_OFFSET)
            .store(count, Ordering::Release);
    }

    /// Number of sample slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one sample. Producer-only; never blocks, overwrites the oldest slot.
    ///
    /// `write_index` is advanced before the slot is filled and `total_written` after,
    /// so a reader can tell a write that is still in flight.
    pub fn write(&self, sample: RawSample) {
        let index = (self.write_index() as usize) % self.capacity;
        let next = ((index + 1) % self.capacity) as u32;
        let encoded = sample.encode();

        self.header_word(WRITE_INDEX_OFFSET)
            .store(next, Ordering::Release);
        fence(Ordering::SeqCst);
        // SAFETY: index < capacity, so the slot lies entirely inside the mapping.
        unsafe {
            let dest = self.base.add(HEADER_SIZE + index * SAMPLE_SIZE);
            std::ptr::copy_nonoverlapping(encoded.as_ptr(), dest, SAMPLE_SIZE);
        }
        fence(Ordering::Release);
        self.store_total(self.total_written() + 1);
    }

    /// Read every sample written after `last_total`, oldest first. Consumer-only.
    ///
    /// More than `capacity` pending samples are clamped to the newest `capacity`.
    /// Slots the producer may have overwritten while they were being copied are
    /// dropped from the front. Both losses are reported in [`ReadBatch::lost`].
    pub fn read_new(&self, last_total: u64) -> ReadBatch {
        let total = self.total_written();
        if total <= last_total {
            return ReadBatch {
                samples: Vec::new(),
                total,
                lost: 0,
            };
        }

        let pending = total - last_total;
        let n = pending.min(self.capacity as u64) as usize;
        let mut lost = pending - n as u64;

        // Index derived from the total so the two header fields can never disagree.
        let end = (total % self.capacity as u64) as usize;
        let start = (end + self.capacity - n) % self.capacity;

        let mut buffer = vec![0u8; n * SAMPLE_SIZE];
        // SAFETY: start < capacity and both halves of a wrapped copy stay inside the
        // slot region; buffer has exactly n slots of room.
        unsafe {
            let slots = self.base.add(HEADER_SIZE);
            if start + n > self.capacity {
                let first = self.capacity - start;
                std::ptr::copy_nonoverlapping(
                    slots.add(start * SAMPLE_SIZE),
                    buffer.as_mut_ptr(),
                    first * SAMPLE_SIZE,
                );
                std::ptr::copy_nonoverlapping(
                    slots,
                    buffer.as_mut_ptr().add(first * SAMPLE_SIZE),
                    (n - first) * SAMPLE_SIZE,
                );
            } else {
                std::ptr::copy_nonoverlapping(
                    slots.add(start * SAMPLE_SIZE),
                    buffer.as_mut_ptr(),
                    n * SAMPLE_SIZE,
                );
            }
        }
        fence(Ordering::Acquire);

        // Writes during the copy advance from `end` into our oldest slots once the free
        // gap is used up. A write index ahead of the total marks one more in flight.
        let after = self.total_written();
        let mut advanced = after.saturating_sub(total) as usize;
        if u64::from(self.write_index()) != after % self.capacity as u64 {
            advanced += 1;
        }
        let free = self.capacity - n;
        let clobbered = advanced.saturating_sub(free).min(n);
        lost += clobbered as u64;

        let samples = buffer[clobbered * SAMPLE_SIZE..]
            .chunks_exact(SAMPLE_SIZE)
            .map(RawSample::decode)
            .collect();

        ReadBatch {
            samples,
            total,
            lost,
        }
    }

    /// Flush the mapping to its backing file.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().context("Failed to flush ring mapping")
    }

    /// Unmap and delete the backing file.
    pub fn remove(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(&path).with_context(|| format!("Failed to unlink ring file: {:?}", path))
    }
}

/// Consumer-side read position with explicit loss accounting.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadCursor {
    last_total: u64,
    overruns: u64,
    trimmed: u64,
}

impl ReadCursor {
    /// Cursor that will return everything written to a fresh ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor that only returns samples written after `total`.
    pub fn starting_at(total: u64) -> Self {
        Self {
            last_total: total,
            ..Self::default()
        }
    }

    /// Fetch new samples, keeping at most `max_batch` of the newest.
    pub fn poll(&mut self, ring: &RingBuffer, max_batch: usize) -> Vec<RawSample> {
        let batch = ring.read_new(self.last_total);
        // Totals never legitimately decrease; a lower one is a torn carry.
        self.last_total = self.last_total.max(batch.total);
        self.overruns += batch.lost;

        let mut samples = batch.samples;
        if samples.len() > max_batch {
            let excess = samples.len() - max_batch;
            samples.drain(..excess);
            self.trimmed += excess as u64;
        }
        samples
    }

    /// `total_written` observed at the last poll.
    pub fn last_total(&self) -> u64 {
        self.last_total
    }

    /// Samples lost because the producer lapped the consumer.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Samples discarded by the batch cap.
    pub fn trimmed(&self) -> u64 {
        self.trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn seq(i: i32) -> RawSample {
        RawSample::new(i, -i, i.wrapping_mul(3))
    }

    #[test]
    fn test_create_ring_buffer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ring.buf");

        let ring = RingBuffer::create(&path, 64).unwrap();
        assert_eq!(ring.capacity(), 64);
        assert_eq!(ring.total_written(), 0);
        assert_eq!(ring.write_index(), 0);
        assert_eq!(ring.restart_count(), 0);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len() as usize,
            HEADER_SIZE + 64 * SAMPLE_SIZE
        );
    }

    #[test]
    fn test_open_derives_capacity_and_header() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ring.buf");

        {
            let ring = RingBuffer::create(&path, 100).unwrap();
            ring.set_restart_count(3);
            for i in 0..7 {
                ring.write(seq(i));
            }
        }

        let ring = RingBuffer::open(&path).unwrap();
        assert_eq!(ring.capacity(), 100);
        assert_eq!(ring.total_written(), 7);
        assert_eq!(ring.write_index(), 7);
        assert_eq!(ring.restart_count(), 3);
    }

    #[test]
    fn test_header_is_little_endian_on_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ring.buf");

        let ring = RingBuffer::create(&path, 4).unwrap();
        ring.set_restart_count(2);
        for i in 0..5 {
            ring.write(seq(i + 1));
        }
        ring.flush().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(bytes[4..12].try_into().unwrap()), 5);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 2);
        // slot 0 was overwritten by the fifth write
        assert_eq!(i32::from_le_bytes(bytes[16..20].try_into().unwrap()), 5);
        assert_eq!(i32::from_le_bytes(bytes[20..24].try_into().unwrap()), -5);
    }

    #[test]
    fn test_open_rejects_inconsistent_length() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ring.buf");
        std::fs::write(&path, vec![0u8; HEADER_SIZE + SAMPLE_SIZE + 5]).unwrap();

        assert!(RingBuffer::open(&path).is_err());
    }

    #[test]
    fn test_read_back_exactly() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ring = RingBuffer::create(&temp_dir.path().join("ring.buf"), 32).unwrap();

        for i in 0..20 {
            ring.write(seq(i));
        }

        let batch = ring.read_new(0);
        assert_eq!(batch.total, 20);
        assert_eq!(batch.lost, 0);
        let expected: Vec<_> = (0..20).map(seq).collect();
        assert_eq!(batch.samples, expected);

        // No new writes, nothing to read
        let again = ring.read_new(batch.total);
        assert!(again.samples.is_empty());
        assert_eq!(again.total, 20);
    }

    #[test]
    fn test_wrap_returns_newest_capacity() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ring = RingBuffer::create(&temp_dir.path().join("ring.buf"), 16).unwrap();

        for i in 0..50 {
            ring.write(seq(i));
        }

        let batch = ring.read_new(0);
        assert_eq!(batch.total, 50);
        assert_eq!(batch.lost, 34);
        let expected: Vec<_> = (34..50).map(seq).collect();
        assert_eq!(batch.samples, expected);
    }

    #[test]
    fn test_incremental_reads_across_wrap() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ring = RingBuffer::create(&temp_dir.path().join("ring.buf"), 10).unwrap();
        let mut cursor = ReadCursor::new();
        let mut seen = Vec::new();

        let mut next = 0;
        for chunk in [3, 7, 4, 9, 1] {
            for _ in 0..chunk {
                ring.write(seq(next));
                next += 1;
            }
            seen.extend(cursor.poll(&ring, 100));
        }

        let expected: Vec<_> = (0..next).map(seq).collect();
        assert_eq!(seen, expected);
        assert_eq!(cursor.overruns(), 0);
        assert_eq!(cursor.last_total(), next as u64);
    }

    #[test]
    fn test_cursor_batch_cap_keeps_newest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ring = RingBuffer::create(&temp_dir.path().join("ring.buf"), 100).unwrap();
        for i in 0..60 {
            ring.write(seq(i));
        }

        let mut cursor = ReadCursor::new();
        let samples = cursor.poll(&ring, 25);
        assert_eq!(samples.len(), 25);
        assert_eq!(samples[0], seq(35));
        assert_eq!(samples[24], seq(59));
        assert_eq!(cursor.trimmed(), 35);
        assert_eq!(cursor.overruns(), 0);
    }

    #[test]
    fn test_cursor_starting_at_skips_history() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ring = RingBuffer::create(&temp_dir.path().join("ring.buf"), 8).unwrap();
        for i in 0..5 {
            ring.write(seq(i));
        }

        let mut cursor = ReadCursor::starting_at(ring.total_written());
        assert!(cursor.poll(&ring, 100).is_empty());
        ring.write(seq(5));
        assert_eq!(cursor.poll(&ring, 100), vec![seq(5)]);
    }

    #[test]
    fn test_fixed_point_conversion() {
        let sample = RawSample::from_units([0.5, -1.0, 0.0000153]);
        assert_eq!(sample.x, 32768);
        assert_eq!(sample.y, -65536);
        assert_eq!(sample.z, 1);
        let units = sample.to_units();
        assert!((units[0] - 0.5).abs() < 1e-12);
        assert!((units[1] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_concurrent_producer_consumer_stays_ordered() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ring.buf");
        let ring = Arc::new(RingBuffer::create(&path, 64).unwrap());
        const COUNT: i32 = 20_000;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..COUNT {
                    ring.write(seq(i));
                }
            })
        };

        // The consumer maps the file separately, as the other process would.
        let reader = RingBuffer::open(&path).unwrap();
        let mut cursor = ReadCursor::new();
        let mut last: Option<i32> = None;
        let mut received = 0u64;
        while cursor.last_total() < COUNT as u64 {
            for sample in cursor.poll(&reader, usize::MAX) {
                if let Some(prev) = last {
                    assert!(sample.x > prev, "out of order: {} after {}", sample.x, prev);
                }
                assert_eq!(sample, seq(sample.x));
                last = Some(sample.x);
                received += 1;
            }
            thread::yield_now();
        }
        producer.join().unwrap();

        assert_eq!(last, Some(COUNT - 1));
        assert_eq!(received + cursor.overruns(), COUNT as u64);
    }

    #[test]
    fn test_total_carries_past_u32() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ring = RingBuffer::create(&temp_dir.path().join("ring.buf"), 8).unwrap();
        ring.store_total((1u64 << 32) + 3);
        assert_eq!(ring.total_written(), (1u64 << 32) + 3);
    }

    #[test]
    fn test_cursor_ignores_total_going_backwards() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ring = RingBuffer::create(&temp_dir.path().join("ring.buf"), 8).unwrap();
        for i in 0..5 {
            ring.write(seq(i));
        }
        let mut cursor = ReadCursor::new();
        assert_eq!(cursor.poll(&ring, 100).len(), 5);

        // A half-updated total as seen mid-carry
        ring.store_total(0);
        assert!(cursor.poll(&ring, 100).is_empty());
        assert_eq!(cursor.last_total(), 5);

        ring.store_total(5);
        ring.write(seq(5));
        assert_eq!(cursor.poll(&ring, 100), vec![seq(5)]);
        assert_eq!(cursor.overruns(), 0);
    }

    #[test]
    fn test_remove_unlinks_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("ring.buf");
        let ring = RingBuffer::create(&path, 8).unwrap();
        ring.remove().unwrap();
        assert!(!path.exists());
    }
}
