//! Chorus - short modulated delay blended with the dry signal
//!
//! The LFO depth is fixed; `rate` sets the LFO speed and `depth` sets how
//! much of the modulated copy is mixed in.

use super::Effect;
use std::f32::consts::PI;

/// Center delay of the modulated copy
const BASE_DELAY_MS: f32 = 20.0;
/// Fixed LFO sweep either side of the center delay
const LFO_DEPTH_MS: f32 = 2.0;
/// Right channel LFO runs a quarter cycle ahead for width
const STEREO_PHASE_OFFSET: f32 = 0.25;

/// Stereo chorus
pub struct Chorus {
    enabled: bool,
    sample_rate: f32,
    /// LFO rate in Hz (0.05 - 10.0)
    rate: f32,
    /// Dry/wet mix of the modulated copy (0.0 - 1.0)
    depth: f32,
    lfo_phase: f32,
    lfo_inc: f32,
    /// Delay buffer (stereo interleaved)
    delay_buffer: Vec<f32>,
    buffer_frames: usize,
    write_pos: usize,
    wet_target: f32,
    wet_current: f32,
}

impl Chorus {
    const WET_SMOOTH_COEFF: f32 = 0.9995;

    pub fn new(sample_rate: f32) -> Self {
        let max_ms = BASE_DELAY_MS + LFO_DEPTH_MS + 1.0;
        let buffer_frames = ((max_ms / 1000.0) * sample_rate).ceil() as usize + 4;
        let rate = 1.5;

        Self {
            enabled: false,
            sample_rate,
            rate,
            depth: 0.3,
            lfo_phase: 0.0,
            lfo_inc: rate / sample_rate,
            delay_buffer: vec![0.0; buffer_frames * 2],
            buffer_frames,
            write_pos: 0,
            wet_target: 0.0,
            wet_current: 0.0,
        }
    }

    /// Set LFO rate in Hz (0.05 - 10.0)
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate.clamp(0.05, 10.0);
        self.lfo_inc = self.rate / self.sample_rate;
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Set wet mix (0.0 - 1.0)
    pub fn set_depth(&mut self, depth: f32) {
        self.depth = depth.clamp(0.0, 1.0);
    }

    pub fn depth(&self) -> f32 {
        self.depth
    }

    /// Read one channel with linear interpolation
    #[inline]
    fn read_delay(&self, delay_samples: f32, channel: usize) -> f32 {
        let frames = self.buffer_frames as f32;
        let read_pos = (self.write_pos as f32 - delay_samples).rem_euclid(frames);
        let i0 = (read_pos as usize) % self.buffer_frames;
        let i1 = (i0 + 1) % self.buffer_frames;
        let frac = read_pos.fract();

        self.delay_buffer[i0 * 2 + channel] * (1.0 - frac)
            + self.delay_buffer[i1 * 2 + channel] * frac
    }

    #[inline]
    fn lfo_delay(&self, phase: f32) -> f32 {
        let lfo = (phase * 2.0 * PI).sin();
        (BASE_DELAY_MS + lfo * LFO_DEPTH_MS) / 1000.0 * self.sample_rate
    }
}

impl Effect for Chorus {
    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled && self.wet_current < 0.0001 {
            return;
        }

        for frame in samples.chunks_exact_mut(2) {
            self.wet_current = Self::WET_SMOOTH_COEFF * self.wet_current
                + (1.0 - Self::WET_SMOOTH_COEFF) * self.wet_target;

            let write_idx = self.write_pos * 2;
            self.delay_buffer[write_idx] = frame[0];
            self.delay_buffer[write_idx + 1] = frame[1];

            let delay_l = self.lfo_delay(self.lfo_phase);
            let delay_r = self.lfo_delay((self.lfo_phase + STEREO_PHASE_OFFSET).fract());
            let wet_l = self.read_delay(delay_l, 0);
            let wet_r = self.read_delay(delay_r, 1);

            self.lfo_phase += self.lfo_inc;
            if self.lfo_phase >= 1.0 {
                self.lfo_phase -= 1.0;
            }
            self.write_pos = (self.write_pos + 1) % self.buffer_frames;

            let mix = self.depth * self.wet_current;
            frame[0] = frame[0] * (1.0 - mix) + wet_l * mix;
            frame[1] = frame[1] * (1.0 - mix) + wet_r * mix;
        }
    }

    fn reset(&mut self) {
        self.delay_buffer.fill(0.0);
        self.write_pos = 0;
        self.lfo_phase = 0.0;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.wet_target = if enabled { 1.0 } else { 0.0 };
    }

    fn name(&self) -> &'static str {
        "Chorus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chorus_parameter_clamping() {
        let mut chorus = Chorus::new(48000.0);
        chorus.set_rate(50.0);
        assert_eq!(chorus.rate(), 10.0);
        chorus.set_depth(-1.0);
        assert_eq!(chorus.depth(), 0.0);
    }

    #[test]
    fn test_impulse_appears_near_base_delay() {
        let mut chorus = Chorus::new(48000.0);
        chorus.set_enabled(true);
        chorus.set_depth(1.0);
        chorus.wet_current = 1.0;

        let mut samples = vec![0.0; 48000 / 10 * 2];
        samples[0] = 1.0;
        chorus.process(&mut samples);

        let left: Vec<f32> = samples.iter().step_by(2).copied().collect();
        let (peak_idx, _) = left
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .unwrap();
        let delay_ms = peak_idx as f32 / 48.0;
        assert!((delay_ms - BASE_DELAY_MS).abs() <= LFO_DEPTH_MS + 0.1, "peak at {} ms", delay_ms);
    }

    #[test]
    fn test_disabled_is_bypass() {
        let mut chorus = Chorus::new(48000.0);
        let mut samples = vec![0.3, 0.1, -0.2, 0.4];
        chorus.process(&mut samples);
        assert_eq!(samples, vec![0.3, 0.1, -0.2, 0.4]);
    }
}
