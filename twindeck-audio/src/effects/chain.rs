//! Fixed-order effects chain: distortion -> chorus -> delay -> reverb

use super::{
    Chorus, ConvolutionReverb, Delay, DelayMode, Distortion, Effect, ImpulseCache, ReverbKernel,
    REVERB_BLOCK,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionSettings {
    pub enabled: bool,
    /// 0.0 - 1.0
    pub drive: f32,
    /// Post filter cutoff in Hz
    pub tone: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChorusSettings {
    pub enabled: bool,
    /// LFO rate in Hz
    pub rate: f32,
    /// Wet mix of the modulated copy
    pub depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySettings {
    pub enabled: bool,
    pub mode: DelayMode,
    /// Seconds
    pub time: f32,
    pub feedback: f32,
    pub mix: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    pub enabled: bool,
    /// Impulse length in seconds
    pub decay: f32,
    pub mix: f32,
}

/// Parameters for the whole chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectsSettings {
    pub distortion: DistortionSettings,
    pub chorus: ChorusSettings,
    pub delay: DelaySettings,
    pub reverb: ReverbSettings,
}

impl Default for EffectsSettings {
    fn default() -> Self {
        Self {
            distortion: DistortionSettings {
                enabled: false,
                drive: 0.2,
                tone: 4000.0,
            },
            chorus: ChorusSettings {
                enabled: false,
                rate: 1.5,
                depth: 0.3,
            },
            delay: DelaySettings {
                enabled: false,
                mode: DelayMode::Digital,
                time: 0.375,
                feedback: 0.35,
                mix: 0.25,
            },
            reverb: ReverbSettings {
                enabled: false,
                decay: 2.0,
                mix: 0.25,
            },
        }
    }
}

/// Build a reverb kernel for `settings` when the cache produced a new
/// impulse, or when no kernel is installed yet. Expensive; call it
/// without holding the graph lock.
pub fn prepare_reverb_kernel(
    settings: &EffectsSettings,
    cache: &mut ImpulseCache,
    installed: bool,
) -> Option<ReverbKernel> {
    let (impulse, generated) = cache.get(settings.reverb.decay);
    (generated || !installed).then(|| ReverbKernel::new(&impulse, REVERB_BLOCK))
}

/// Serial effects processor inserted after one deck
pub struct EffectsChain {
    distortion: Distortion,
    chorus: Chorus,
    delay: Delay,
    reverb: ConvolutionReverb,
    settings: EffectsSettings,
}

impl EffectsChain {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let mut chain = Self {
            distortion: Distortion::new(sr),
            chorus: Chorus::new(sr),
            delay: Delay::new(sample_rate),
            reverb: ConvolutionReverb::new(),
            settings: EffectsSettings::default(),
        };
        chain.apply_settings(&EffectsSettings::default());
        chain
    }

    /// Push every cheap parameter. The reverb impulse is installed
    /// separately through [`EffectsChain::set_reverb_kernel`].
    pub fn apply_settings(&mut self, settings: &EffectsSettings) {
        let d = &settings.distortion;
        self.distortion.set_drive(d.drive);
        self.distortion.set_tone(d.tone);
        self.distortion.set_enabled(d.enabled);

        let c = &settings.chorus;
        self.chorus.set_rate(c.rate);
        self.chorus.set_depth(c.depth);
        self.chorus.set_enabled(c.enabled);

        let dl = &settings.delay;
        self.delay.set_mode(dl.mode);
        self.delay.set_time(dl.time);
        self.delay.set_feedback(dl.feedback);
        self.delay.set_mix(dl.mix);
        self.delay.set_enabled(dl.enabled);

        let r = &settings.reverb;
        self.reverb.set_mix(r.mix);
        self.reverb.set_enabled(r.enabled);

        self.settings = *settings;
    }

    /// Swap in a prepared reverb impulse, returning the old one
    pub fn set_reverb_kernel(&mut self, kernel: ReverbKernel) -> Option<ReverbKernel> {
        self.reverb.set_kernel(kernel)
    }

    /// Install a kernel from [`prepare_reverb_kernel`] (if any) and apply
    /// `settings`. Returns the replaced kernel so the caller can drop it
    /// off the render path.
    pub fn update(
        &mut self,
        settings: &EffectsSettings,
        kernel: Option<ReverbKernel>,
    ) -> Option<ReverbKernel> {
        let replaced = kernel.and_then(|k| self.set_reverb_kernel(k));
        self.apply_settings(settings);
        replaced
    }

    pub fn has_reverb_kernel(&self) -> bool {
        self.reverb.impulse_duration().is_some()
    }

    pub fn settings(&self) -> &EffectsSettings {
        &self.settings
    }

    pub fn delay(&self) -> &Delay {
        &self.delay
    }

    pub fn reverb(&self) -> &ConvolutionReverb {
        &self.reverb
    }

    fn stages(&mut self) -> [&mut dyn Effect; 4] {
        [
            &mut self.distortion,
            &mut self.chorus,
            &mut self.delay,
            &mut self.reverb,
        ]
    }

    /// Names of the stages in processing order
    pub fn stage_names(&mut self) -> [&'static str; 4] {
        self.stages().map(|e| e.name())
    }

    /// Process stereo interleaved samples through every stage in order
    pub fn process(&mut self, samples: &mut [f32]) {
        for stage in self.stages() {
            stage.process(samples);
        }
    }

    pub fn reset(&mut self) {
        for stage in self.stages() {
            stage.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut chain = EffectsChain::new(48000);
        assert_eq!(chain.stage_names(), ["Distortion", "Chorus", "Delay", "Reverb"]);
    }

    #[test]
    fn test_default_chain_is_transparent() {
        let mut chain = EffectsChain::new(48000);
        let mut samples: Vec<f32> = (0..512).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let input = samples.clone();
        chain.process(&mut samples);
        assert_eq!(samples, input);
    }

    #[test]
    fn test_feedback_clamped_through_settings() {
        let mut chain = EffectsChain::new(48000);
        let mut settings = EffectsSettings::default();
        settings.delay.feedback = 1.5;
        chain.apply_settings(&settings);
        assert_eq!(chain.delay().feedback(), 0.95);
    }

    #[test]
    fn test_update_reuses_impulse_for_same_decay() {
        let mut chain = EffectsChain::new(8000);
        let mut cache = ImpulseCache::new(8000);
        let mut settings = EffectsSettings::default();
        settings.reverb.enabled = true;
        settings.reverb.decay = 1.0;

        let kernel = prepare_reverb_kernel(&settings, &mut cache, chain.has_reverb_kernel());
        assert!(kernel.is_some());
        assert!(chain.update(&settings, kernel).is_none());

        settings.reverb.mix = 0.6;
        let kernel = prepare_reverb_kernel(&settings, &mut cache, chain.has_reverb_kernel());
        assert!(kernel.is_none());
        chain.update(&settings, kernel);
        assert_eq!(cache.generations(), 1);
        assert_eq!(chain.reverb().mix(), 0.6);

        settings.reverb.decay = 1.5;
        let kernel = prepare_reverb_kernel(&settings, &mut cache, chain.has_reverb_kernel());
        let replaced = chain.update(&settings, kernel);
        assert!((replaced.unwrap().duration() - 1.0).abs() < 1e-3);
        assert_eq!(cache.generations(), 2);
        assert!((chain.reverb().impulse_duration().unwrap() - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_empty_chain_always_gets_a_kernel() {
        let mut cache = ImpulseCache::new(8000);
        let settings = EffectsSettings::default();
        cache.get(settings.reverb.decay);
        // Impulse already cached, but a fresh chain still needs one
        let kernel = prepare_reverb_kernel(&settings, &mut cache, false);
        assert!(kernel.is_some());
        assert_eq!(cache.generations(), 1);
    }

    #[test]
    fn test_enabled_chain_stays_finite() {
        let mut chain = EffectsChain::new(8000);
        let mut cache = ImpulseCache::new(8000);
        let mut settings = EffectsSettings::default();
        settings.distortion.enabled = true;
        settings.chorus.enabled = true;
        settings.delay.enabled = true;
        settings.delay.feedback = 0.95;
        settings.reverb.enabled = true;
        settings.reverb.decay = 0.5;
        let kernel = prepare_reverb_kernel(&settings, &mut cache, false);
        chain.update(&settings, kernel);

        let mut samples: Vec<f32> = (0..16000).map(|i| (i as f32 * 0.1).sin()).collect();
        chain.process(&mut samples);
        assert!(samples.iter().all(|s| s.is_finite()));
    }
}
