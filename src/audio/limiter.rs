//! Master limiter with a soft knee.
//!
//! Samples below the threshold pass through. Above it they are bent with
//! `tanh` so the output approaches but never exceeds the ceiling. Overlapping
//! voices sum without normalization, so every output runs through this.

#[derive(Debug, Clone)]
pub struct Limiter {
    threshold: f32,
    ceiling: f32,
}

impl Limiter {
    /// `threshold` must be below `ceiling`, both in `(0.0, 1.0]`.
    pub fn new(threshold: f32, ceiling: f32) -> Self {
        debug_assert!(threshold > 0.0 && threshold < ceiling && ceiling <= 1.0);
        Self { threshold, ceiling }
    }

    #[inline]
    pub fn process(&self, sample: f32) -> f32 {
        let magnitude = sample.abs();
        if magnitude <= self.threshold {
            return sample;
        }
        let headroom = self.ceiling - self.threshold;
        let bent = self.threshold + headroom * ((magnitude - self.threshold) / headroom).tanh();
        bent.copysign(sample)
    }

    #[inline]
    pub fn process_block(&self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(0.8, 0.95)
    }
}
