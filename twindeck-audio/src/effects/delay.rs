//! Feedback delay with mode-dependent tone filtering
//!
//! Each repeat passes through a one-pole lowpass whose cutoff depends on
//! the delay mode, so analog and tape repeats darken as they decay.

use super::Effect;
use std::f32::consts::PI;

/// Maximum delay time in seconds
const MAX_DELAY_SECS: f32 = 2.0;
/// Minimum delay time in seconds
const MIN_DELAY_SECS: f32 = 0.01;
/// Feedback is never allowed to reach unity
pub const MAX_FEEDBACK: f32 = 0.95;

/// Character of the feedback path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum DelayMode {
    /// Bright repeats
    #[default]
    Digital,
    /// Darker repeats
    Analog,
    /// Darkest repeats
    Tape,
}

impl DelayMode {
    /// Feedback tone filter cutoff in Hz
    pub fn feedback_cutoff(self) -> f32 {
        match self {
            DelayMode::Digital => 12000.0,
            DelayMode::Analog => 4500.0,
            DelayMode::Tape => 2500.0,
        }
    }

    /// Parse a mode name (`digital`, `analog`, `tape`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "digital" => Some(DelayMode::Digital),
            "analog" => Some(DelayMode::Analog),
            "tape" => Some(DelayMode::Tape),
            _ => None,
        }
    }
}

/// Stereo feedback delay
pub struct Delay {
    sample_rate: f32,
    /// Delay buffer (stereo interleaved: L,R,L,R,...)
    buffer: Vec<f32>,
    /// Buffer length in stereo frames
    buffer_frames: usize,
    /// Write position (in frames)
    write_pos: usize,
    /// Delay time in fractional samples
    delay_samples: f32,
    /// Target delay (for smoothing)
    target_delay: f32,
    /// Delay smoothing coefficient
    delay_smooth: f32,
    /// Feedback amount (0.0 - 0.95)
    feedback: f32,
    /// Wet/dry mix (0.0 = dry, 1.0 = wet)
    mix: f32,
    mode: DelayMode,
    /// One-pole lowpass state on the feedback path
    lp_state_l: f32,
    lp_state_r: f32,
    lp_coeff: f32,
    enabled: bool,
    wet_target: f32,
    wet_current: f32,
}

impl Delay {
    /// Wet envelope smoothing coefficient (~10ms at 48kHz)
    const WET_SMOOTH_COEFF: f32 = 0.9995;

    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        let buffer_frames = (sr * MAX_DELAY_SECS) as usize + 4;
        let mode = DelayMode::default();

        Self {
            sample_rate: sr,
            buffer: vec![0.0; buffer_frames * 2],
            buffer_frames,
            write_pos: 0,
            delay_samples: sr * 0.375,
            target_delay: sr * 0.375,
            delay_smooth: 0.9995,
            feedback: 0.35,
            mix: 0.25,
            mode,
            lp_state_l: 0.0,
            lp_state_r: 0.0,
            lp_coeff: Self::lowpass_coeff(mode.feedback_cutoff(), sr),
            enabled: false,
            wet_target: 0.0,
            wet_current: 0.0,
        }
    }

    fn lowpass_coeff(cutoff: f32, sample_rate: f32) -> f32 {
        (-2.0 * PI * cutoff / sample_rate).exp()
    }

    /// Set delay time in seconds (0.01 - 2.0); the read head glides there
    pub fn set_time(&mut self, secs: f32) {
        let secs = secs.clamp(MIN_DELAY_SECS, MAX_DELAY_SECS);
        self.target_delay = secs * self.sample_rate;
    }

    /// Delay time the read head is heading toward, in seconds
    pub fn time(&self) -> f32 {
        self.target_delay / self.sample_rate
    }

    /// Set feedback amount (clamped to 0.0 - 0.95)
    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(0.0, MAX_FEEDBACK);
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Set wet/dry mix (0.0 - 1.0)
    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }

    pub fn set_mode(&mut self, mode: DelayMode) {
        self.mode = mode;
        self.lp_coeff = Self::lowpass_coeff(mode.feedback_cutoff(), self.sample_rate);
    }

    pub fn mode(&self) -> DelayMode {
        self.mode
    }

    /// Read from the delay line with linear interpolation
    #[inline]
    fn read_interpolated(&self, delay_frames: f32) -> (f32, f32) {
        let int_delay = delay_frames as usize;
        let frac = delay_frames - int_delay as f32;

        let pos = if self.write_pos >= int_delay {
            self.write_pos - int_delay
        } else {
            self.buffer_frames - (int_delay - self.write_pos)
        };
        let older = if pos == 0 { self.buffer_frames - 1 } else { pos - 1 };

        let (i0, i1) = (pos * 2, older * 2);
        let l = self.buffer[i0] * (1.0 - frac) + self.buffer[i1] * frac;
        let r = self.buffer[i0 + 1] * (1.0 - frac) + self.buffer[i1 + 1] * frac;
        (l, r)
    }

    /// Soft saturation for the feedback path
    #[inline(always)]
    fn soft_saturate(x: f32) -> f32 {
        x / (1.0 + x.abs())
    }
}

impl Effect for Delay {
    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled && self.wet_current < 0.0001 {
            return;
        }

        for frame in samples.chunks_exact_mut(2) {
            self.wet_current = Self::WET_SMOOTH_COEFF * self.wet_current
                + (1.0 - Self::WET_SMOOTH_COEFF) * self.wet_target;

            self.delay_samples = self.delay_samples * self.delay_smooth
                + self.target_delay * (1.0 - self.delay_smooth);
            let delay = self
                .delay_samples
                .clamp(1.0, self.buffer_frames as f32 - 2.0);

            let (delayed_l, delayed_r) = self.read_interpolated(delay);

            // Repeats darken through the mode's tone filter
            self.lp_state_l = delayed_l * (1.0 - self.lp_coeff) + self.lp_state_l * self.lp_coeff;
            self.lp_state_r = delayed_r * (1.0 - self.lp_coeff) + self.lp_state_r * self.lp_coeff;

            let input_gate = if self.enabled { 1.0 } else { 0.0 };
            let write_idx = self.write_pos * 2;
            self.buffer[write_idx] =
                frame[0] * input_gate + Self::soft_saturate(self.lp_state_l * self.feedback);
            self.buffer[write_idx + 1] =
                frame[1] * input_gate + Self::soft_saturate(self.lp_state_r * self.feedback);

            let effective_mix = self.mix * self.wet_current;
            let dry = 1.0 - effective_mix;
            frame[0] = frame[0] * dry + delayed_l * effective_mix;
            frame[1] = frame[1] * dry + delayed_r * effective_mix;

            self.write_pos = (self.write_pos + 1) % self.buffer_frames;
        }
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.delay_samples = self.target_delay;
        self.lp_state_l = 0.0;
        self.lp_state_r = 0.0;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.wet_target = if enabled { 1.0 } else { 0.0 };
    }

    fn name(&self) -> &'static str {
        "Delay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_clamped() {
        let mut delay = Delay::new(48000);
        delay.set_feedback(1.2);
        assert_eq!(delay.feedback(), 0.95);
        delay.set_feedback(-0.5);
        assert_eq!(delay.feedback(), 0.0);
    }

    #[test]
    fn test_time_clamped() {
        let mut delay = Delay::new(48000);
        delay.set_time(5.0);
        assert!((delay.time() - 2.0).abs() < 1e-6);
        delay.set_time(0.0);
        assert!((delay.time() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_mode_cutoffs() {
        assert_eq!(DelayMode::Digital.feedback_cutoff(), 12000.0);
        assert_eq!(DelayMode::Analog.feedback_cutoff(), 4500.0);
        assert_eq!(DelayMode::Tape.feedback_cutoff(), 2500.0);
        assert_eq!(DelayMode::from_name("Tape"), Some(DelayMode::Tape));
        assert_eq!(DelayMode::from_name("spring"), None);
    }

    #[test]
    fn test_echo_at_delay_time() {
        let mut delay = Delay::new(1000);
        delay.set_time(0.1);
        delay.reset();
        delay.set_mix(1.0);
        delay.set_feedback(0.0);
        delay.set_enabled(true);
        delay.wet_current = 1.0;

        let mut samples = vec![0.0; 400];
        samples[0] = 1.0;
        samples[1] = 1.0;
        delay.process(&mut samples);

        let left: Vec<f32> = samples.iter().step_by(2).copied().collect();
        assert!((left[100] - 1.0).abs() < 1e-3, "echo {}", left[100]);
        assert!(left[150].abs() < 1e-6);
    }

    #[test]
    fn test_feedback_decays() {
        let mut delay = Delay::new(1000);
        delay.set_time(0.05);
        delay.reset();
        delay.set_mix(1.0);
        delay.set_feedback(0.95);
        delay.set_mode(DelayMode::Tape);
        delay.set_enabled(true);
        delay.wet_current = 1.0;

        let mut samples = vec![0.0; 20000];
        samples[0] = 1.0;
        samples[1] = 1.0;
        delay.process(&mut samples);
        assert!(samples.iter().all(|s| s.is_finite()));
        let tail = samples[18000..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail < 0.5);
    }
}
