//! ADSR envelope generator

/// Attack/decay/release times in seconds, sustain as a fraction of peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrSettings {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for AdsrSettings {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.8,
            release: 0.2,
        }
    }
}

/// Shape of the release segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCurve {
    /// Straight line to zero
    Linear,
    /// Exponential ramp down to [`Envelope::EXP_FLOOR`], then silence
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
    Done,
}

/// Sample-stepped ADSR scaled to a peak level
#[derive(Debug, Clone)]
pub struct Envelope {
    settings: AdsrSettings,
    curve: ReleaseCurve,
    sample_rate: f32,
    stage: EnvelopeStage,
    level: f32,
    peak: f32,
    release_start: f32,
    release_total: usize,
    release_pos: usize,
}

impl Envelope {
    /// Exponential releases cannot reach zero; they stop here
    pub const EXP_FLOOR: f32 = 1.0e-4;

    pub fn new(settings: AdsrSettings, curve: ReleaseCurve, sample_rate: f32) -> Self {
        Self {
            settings,
            curve,
            sample_rate,
            stage: EnvelopeStage::Idle,
            level: 0.0,
            peak: 1.0,
            release_start: 0.0,
            release_total: 0,
            release_pos: 0,
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn settings(&self) -> &AdsrSettings {
        &self.settings
    }

    /// Start the attack toward `peak`
    pub fn trigger(&mut self, peak: f32) {
        self.peak = peak.max(0.0);
        self.stage = EnvelopeStage::Attack;
    }

    /// Release over the configured release time
    pub fn release(&mut self) {
        self.release_over(self.settings.release);
    }

    /// Release from the current level over `secs`
    pub fn release_over(&mut self, secs: f32) {
        if matches!(self.stage, EnvelopeStage::Idle | EnvelopeStage::Done) {
            self.stage = EnvelopeStage::Done;
            self.level = 0.0;
            return;
        }
        self.release_start = self.level;
        self.release_total = (secs.max(0.0) * self.sample_rate) as usize;
        self.release_pos = 0;
        self.stage = EnvelopeStage::Release;
    }

    fn sustain_level(&self) -> f32 {
        self.peak * self.settings.sustain.clamp(0.0, 1.0)
    }

    /// Advance one sample
    #[inline]
    pub fn next(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle | EnvelopeStage::Done => {
                self.level = 0.0;
            }
            EnvelopeStage::Attack => {
                let samples = self.settings.attack * self.sample_rate;
                if samples > 1.0 {
                    self.level += self.peak / samples;
                } else {
                    self.level = self.peak;
                }
                if self.level >= self.peak {
                    self.level = self.peak;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                let target = self.sustain_level();
                let samples = self.settings.decay * self.sample_rate;
                if samples > 1.0 {
                    self.level -= (self.peak - target) / samples;
                } else {
                    self.level = target;
                }
                if self.level <= target {
                    self.level = target;
                    self.stage = EnvelopeStage::Sustain;
                }
            }
            EnvelopeStage::Sustain => {
                self.level = self.sustain_level();
            }
            EnvelopeStage::Release => {
                if self.release_pos >= self.release_total {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Done;
                } else {
                    self.release_pos += 1;
                    let t = self.release_pos as f32 / self.release_total as f32;
                    self.level = match self.curve {
                        ReleaseCurve::Linear => self.release_start * (1.0 - t),
                        ReleaseCurve::Exponential if self.release_start > Self::EXP_FLOOR => {
                            self.release_start * (Self::EXP_FLOOR / self.release_start).powf(t)
                        }
                        ReleaseCurve::Exponential => self.release_start * (1.0 - t),
                    };
                }
            }
        }
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    fn settings() -> AdsrSettings {
        AdsrSettings {
            attack: 0.1,
            decay: 0.1,
            sustain: 0.5,
            release: 0.2,
        }
    }

    #[test]
    fn test_attack_reaches_peak() {
        let mut env = Envelope::new(settings(), ReleaseCurve::Linear, SR);
        env.trigger(0.8);
        for _ in 0..100 {
            env.next();
        }
        assert!((env.level() - 0.8).abs() < 1e-3);
    }

    #[test]
    fn test_decays_to_scaled_sustain() {
        let mut env = Envelope::new(settings(), ReleaseCurve::Linear, SR);
        env.trigger(0.8);
        for _ in 0..300 {
            env.next();
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert!((env.level() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_linear_release_finishes_on_time() {
        let mut env = Envelope::new(settings(), ReleaseCurve::Linear, SR);
        env.trigger(1.0);
        for _ in 0..300 {
            env.next();
        }
        env.release();
        for _ in 0..200 {
            env.next();
        }
        assert!(env.level().abs() < 1e-6);
        env.next();
        assert_eq!(env.stage(), EnvelopeStage::Done);
    }

    #[test]
    fn test_exponential_release_reaches_floor() {
        let mut env = Envelope::new(settings(), ReleaseCurve::Exponential, SR);
        env.trigger(1.0);
        for _ in 0..300 {
            env.next();
        }
        env.release();
        let mut halfway = 0.0;
        for i in 0..200 {
            let v = env.next();
            if i == 99 {
                halfway = v;
            }
        }
        // Geometric midpoint of 0.5 -> 1e-4
        assert!((halfway - (0.5f32 * 1e-4).sqrt()).abs() < 1e-3);
        assert!((env.level() - Envelope::EXP_FLOOR).abs() < 1e-6);
    }

    #[test]
    fn test_release_from_idle_is_done() {
        let mut env = Envelope::new(settings(), ReleaseCurve::Linear, SR);
        env.release();
        assert_eq!(env.stage(), EnvelopeStage::Done);
    }
}
