//! Fixed-capacity rolling window with running sums.

use std::collections::VecDeque;

/// Circular buffer of the most recent `capacity` values.
///
/// Keeps running sums so mean and RMS are O(1). The sums are rebuilt from the
/// buffer once per `capacity` pushes to stop floating-point drift.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f64>,
    capacity: usize,
    sum: f64,
    sum_sq: f64,
    since_rebuild: usize,
}

impl RollingWindow {
    /// Empty window holding at most `capacity` values (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
            sum_sq: 0.0,
            since_rebuild: 0,
        }
    }

    /// Append a value, evicting the oldest when full.
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }
        self.values.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;

        self.since_rebuild += 1;
        if self.since_rebuild >= self.capacity {
            self.since_rebuild = 0;
            self.sum = self.values.iter().sum();
            self.sum_sq = self.values.iter().map(|v| v * v).sum();
        }
    }

    /// Number of values held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of values held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arithmetic mean, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.sum / self.values.len() as f64
        }
    }

    /// Root mean square, 0 when empty.
    pub fn rms(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            (self.sum_sq.max(0.0) / self.values.len() as f64).sqrt()
        }
    }

    /// Values oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.values.iter()
    }

    /// Copy of the newest `n` values (all of them if fewer), oldest first.
    pub fn latest(&self, n: usize) -> Vec<f64> {
        let skip = self.values.len().saturating_sub(n);
        self.values.iter().skip(skip).copied().collect()
    }

    /// Most recently pushed value.
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest() {
        let mut window = RollingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        assert!((window.mean() - 3.0).abs() < 1e-12);
        assert_eq!(window.last(), Some(4.0));
    }

    #[test]
    fn rms_tracks_contents() {
        let mut window = RollingWindow::new(4);
        for v in [3.0, -3.0, 3.0, -3.0, 3.0] {
            window.push(v);
        }
        assert!((window.rms() - 3.0).abs() < 1e-12);
        assert!(window.mean().abs() < 1e-12);
    }

    #[test]
    fn latest_returns_tail() {
        let mut window = RollingWindow::new(10);
        for v in 0..6 {
            window.push(v as f64);
        }
        assert_eq!(window.latest(2), vec![4.0, 5.0]);
        assert_eq!(window.latest(100).len(), 6);
    }

    #[test]
    fn running_sums_do_not_drift() {
        let mut window = RollingWindow::new(50);
        for i in 0..100_000 {
            window.push(if i % 2 == 0 { 1e6 } else { 1e-6 });
        }
        for _ in 0..50 {
            window.push(0.5);
        }
        assert!((window.mean() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_window_is_zero() {
        let window = RollingWindow::new(0);
        assert_eq!(window.capacity(), 1);
        assert!(window.is_empty());
        assert_eq!(window.mean(), 0.0);
        assert_eq!(window.rms(), 0.0);
    }
}
