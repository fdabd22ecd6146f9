//! Audio effects for the insert chain

mod chain;
mod chorus;
mod delay;
mod distortion;
mod reverb;

pub use chain::{
    prepare_reverb_kernel, ChorusSettings, DelaySettings, DistortionSettings, EffectsChain,
    EffectsSettings, ReverbSettings,
};
pub use chorus::Chorus;
pub use delay::{Delay, DelayMode, MAX_FEEDBACK};
pub use distortion::{distortion_curve, Distortion, CURVE_SIZE};
pub use reverb::{
    ConvolutionReverb, Convolver, Impulse, ImpulseCache, ReverbKernel, MAX_DECAY_SECS,
    MIN_DECAY_SECS, REVERB_BLOCK,
};

/// Trait for audio effects
pub trait Effect: Send {
    /// Process audio samples in place (stereo interleaved)
    fn process(&mut self, samples: &mut [f32]);

    /// Reset effect state
    fn reset(&mut self);

    /// Check if effect is enabled
    fn is_enabled(&self) -> bool;

    /// Enable/disable the effect
    fn set_enabled(&mut self, enabled: bool);

    /// Get effect name
    fn name(&self) -> &'static str;
}
