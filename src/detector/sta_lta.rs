//! Short-term / long-term average ratio trigger with hysteresis.
//!
//! Both averages are exponential with time constants in samples. Until a
//! constant's worth of samples has been seen, the average uses the sample count
//! instead, so it starts as the cumulative mean of what has arrived and never
//! divides a real signal by an arbitrary seed value. The trigger only arms after
//! ten short-term constants of history.
//!
//! Each timescale is therefore blind for its first `10 * sta_n` samples. With
//! the default constants (3, 15, 50 at 100 Hz) that is 0.3 s, 1.5 s and 5 s.
//! Right after start the long-term average holds only a few samples of the
//! quiet baseline, so the first real motion would otherwise produce a huge
//! ratio and a spurious trigger on every stage.

/// Energy floor added to the long-term average (g²).
const LTA_FLOOR: f64 = 1e-12;

/// Short-term constants of history required before the trigger may fire.
const ARMING_FACTOR: u64 = 10;

/// One STA/LTA timescale.
#[derive(Debug, Clone)]
pub struct StaLta {
    sta_n: u64,
    lta_n: u64,
    on: f64,
    off: f64,
    sta: f64,
    lta: f64,
    count: u64,
    active: bool,
    ratio: f64,
}

impl StaLta {
    /// Trigger with the given averaging lengths (samples) and on/off ratios.
    pub fn new(sta_n: usize, lta_n: usize, on: f64, off: f64) -> Self {
        Self {
            sta_n: sta_n.max(1) as u64,
            lta_n: lta_n.max(1) as u64,
            on,
            off,
            sta: 0.0,
            lta: 0.0,
            count: 0,
            active: false,
            ratio: 1.0,
        }
    }

    /// Feed one energy value; `true` on an off→on transition.
    pub fn process(&mut self, energy: f64) -> bool {
        self.count += 1;
        let sta_n = self.count.min(self.sta_n) as f64;
        let lta_n = self.count.min(self.lta_n) as f64;
        self.sta += (energy - self.sta) / sta_n;
        self.lta += (energy - self.lta) / lta_n;
        self.ratio = self.sta / (self.lta + LTA_FLOOR);

        let armed = self.count >= ARMING_FACTOR * self.sta_n;
        if self.ratio > self.on && !self.active && armed {
            self.active = true;
            true
        } else {
            if self.ratio < self.off {
                self.active = false;
            }
            false
        }
    }

    /// Latest STA/LTA ratio.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Whether the trigger is currently on.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(trigger: &mut StaLta, n: usize) -> usize {
        (0..n).filter(|_| trigger.process(1e-6)).count()
    }

    #[test]
    fn burst_fires_once_with_hysteresis() {
        let mut trigger = StaLta::new(3, 100, 3.0, 1.5);
        assert_eq!(quiet(&mut trigger, 500), 0);

        let fired = (0..30).filter(|_| trigger.process(1e-2)).count();
        assert_eq!(fired, 1);
        assert!(trigger.is_active());
        assert!(trigger.ratio() > 1.5);

        // Back to quiet: drops below off, then a new burst fires again
        assert_eq!(quiet(&mut trigger, 200), 0);
        assert!(!trigger.is_active());
        let fired = (0..30).filter(|_| trigger.process(1e-2)).count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn ratio_between_thresholds_does_not_refire() {
        let mut trigger = StaLta::new(3, 100, 3.0, 1.5);
        quiet(&mut trigger, 500);
        assert!(trigger.process(1e-4));

        // Hover around 2x the baseline: above off, below on.
        for _ in 0..20 {
            assert!(!trigger.process(2e-6));
        }
    }

    #[test]
    fn not_armed_during_warmup() {
        let mut trigger = StaLta::new(50, 2000, 2.0, 1.2);
        quiet(&mut trigger, 100);
        // 101 samples < 10 x 50: a burst is seen in the ratio but does not fire
        assert!(!trigger.process(1.0));
        assert!(trigger.ratio() > 2.0);
    }

    #[test]
    fn arms_at_ten_short_term_constants() {
        let mut trigger = StaLta::new(5, 100, 2.0, 1.2);
        quiet(&mut trigger, 48);
        // sample 49 is still inside the blind window
        assert!(!trigger.process(1.0));
        assert!(trigger.process(1.0));
    }

    #[test]
    fn cumulative_seed_starts_at_unity() {
        let mut trigger = StaLta::new(3, 100, 3.0, 1.5);
        trigger.process(4e-6);
        assert!((trigger.ratio() - 1.0).abs() < 1e-3);
    }
}
