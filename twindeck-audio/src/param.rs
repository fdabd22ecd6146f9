//! Click-free parameter smoothing
//!
//! Every parameter write in the graph goes through a [`SmoothedParam`]:
//! the value approaches its target exponentially with a fixed time
//! constant, so changing a knob never produces an instantaneous jump.

/// Parameter that approaches its target with a first-order exponential
#[derive(Debug, Clone)]
pub struct SmoothedParam {
    current: f32,
    target: f32,
    /// Per-sample approach coefficient
    coeff: f32,
}

impl SmoothedParam {
    /// Values closer than this to the target snap onto it
    const SNAP: f32 = 1.0e-6;

    /// Create a parameter resting at `value`
    pub fn new(value: f32, time_constant_secs: f32, sample_rate: f32) -> Self {
        Self {
            current: value,
            target: value,
            coeff: Self::coeff_for(time_constant_secs, sample_rate),
        }
    }

    /// Per-sample coefficient for a time constant (0 = instant)
    fn coeff_for(time_constant_secs: f32, sample_rate: f32) -> f32 {
        let samples = time_constant_secs * sample_rate;
        if samples <= 0.0 {
            1.0
        } else {
            1.0 - (-1.0 / samples).exp()
        }
    }

    pub fn set_time_constant(&mut self, time_constant_secs: f32, sample_rate: f32) {
        self.coeff = Self::coeff_for(time_constant_secs, sample_rate);
    }

    /// Start approaching a new value
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Jump straight to a value (only for silent moments, e.g. before playback)
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Advance one sample and return the new value
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.current != self.target {
            self.current += (self.target - self.current) * self.coeff;
            if (self.target - self.current).abs() < Self::SNAP {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Advance `samples` steps at once (control-rate parameters)
    pub fn advance(&mut self, samples: usize) -> f32 {
        if self.current != self.target {
            let remaining = (1.0 - self.coeff).powi(samples as i32);
            self.current = self.target + (self.current - self.target) * remaining;
            if (self.target - self.current).abs() < Self::SNAP {
                self.current = self.target;
            }
        }
        self.current
    }

    pub fn value(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_instant_jump() {
        let mut p = SmoothedParam::new(0.0, 0.015, 48000.0);
        p.set_target(1.0);
        let first = p.next();
        assert!(first > 0.0 && first < 0.01, "first step was {}", first);
    }

    #[test]
    fn test_reaches_63_percent_after_one_time_constant() {
        let mut p = SmoothedParam::new(0.0, 0.010, 48000.0);
        p.set_target(1.0);
        let mut v = 0.0;
        for _ in 0..480 {
            v = p.next();
        }
        assert!((v - 0.632).abs() < 0.01, "value after tau was {}", v);
    }

    #[test]
    fn test_block_advance_matches_per_sample() {
        let mut a = SmoothedParam::new(0.0, 0.015, 48000.0);
        let mut b = a.clone();
        a.set_target(2.0);
        b.set_target(2.0);
        for _ in 0..64 {
            a.next();
        }
        b.advance(64);
        assert!((a.value() - b.value()).abs() < 1e-4);
    }

    #[test]
    fn test_settles_on_target() {
        let mut p = SmoothedParam::new(0.0, 0.001, 48000.0);
        p.set_target(0.5);
        for _ in 0..48000 {
            p.next();
        }
        assert!(p.is_settled());
        assert_eq!(p.value(), 0.5);
    }

    #[test]
    fn test_zero_time_constant_is_instant() {
        let mut p = SmoothedParam::new(0.0, 0.0, 48000.0);
        p.set_target(0.75);
        assert_eq!(p.next(), 0.75);
    }
}
