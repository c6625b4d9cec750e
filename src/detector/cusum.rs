//! Bilateral CUSUM change detector around a slowly adapting mean.

/// Which accumulator crossed the decision interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CusumOutcome {
    /// Upward shift detected
    pub positive: bool,
    /// Downward shift detected
    pub negative: bool,
}

impl CusumOutcome {
    /// Either side fired.
    pub fn fired(self) -> bool {
        self.positive || self.negative
    }
}

/// Two-sided cumulative sum with slack `k` and decision interval `h`.
#[derive(Debug, Clone)]
pub struct Cusum {
    k: f64,
    h: f64,
    adapt: f64,
    mean: f64,
    pos: f64,
    neg: f64,
    level: f64,
}

impl Cusum {
    /// New detector; `adapt` is the per-sample mean adaptation rate.
    pub fn new(k: f64, h: f64, adapt: f64) -> Self {
        Self {
            k,
            h,
            adapt,
            mean: 0.0,
            pos: 0.0,
            neg: 0.0,
            level: 0.0,
        }
    }

    /// Feed one value. A side that crosses `h` fires and resets to zero.
    pub fn process(&mut self, x: f64) -> CusumOutcome {
        self.mean += self.adapt * (x - self.mean);
        self.pos = (self.pos + x - self.mean - self.k).max(0.0);
        self.neg = (self.neg - x + self.mean - self.k).max(0.0);
        self.level = self.pos.max(self.neg);

        let mut outcome = CusumOutcome::default();
        if self.pos > self.h {
            outcome.positive = true;
            self.pos = 0.0;
        }
        if self.neg > self.h {
            outcome.negative = true;
            self.neg = 0.0;
        }
        outcome
    }

    /// Larger of the two accumulators before any reset on the last sample.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Current adaptive mean.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Current accumulators `(positive, negative)`.
    pub fn accumulators(&self) -> (f64, f64) {
        (self.pos, self.neg)
    }
}
