//! Waveshaping distortion with a post tone filter
//!
//! The shaping curve is sampled into a lookup table whenever the drive
//! changes and read back with linear interpolation.

use super::Effect;
use crate::biquad::{BiquadCoeffs, StereoBiquad};
use std::f32::consts::PI;

/// Number of points in the shaping table
pub const CURVE_SIZE: usize = 4096;

/// Shaping function for drive in [0, 1] at input `x` in [-1, 1]
pub fn distortion_curve(x: f32, drive: f32) -> f32 {
    let k = drive * 100.0;
    let c = 20.0 * PI / 180.0;
    (3.0 + k) * x * c / (PI + k * x.abs())
}

/// Drive + tone distortion (always fully wet when enabled)
pub struct Distortion {
    enabled: bool,
    sample_rate: f32,
    /// Drive amount (0.0 - 1.0)
    drive: f32,
    /// Tone filter cutoff in Hz
    tone: f32,
    curve: Vec<f32>,
    tone_filter: StereoBiquad,
    wet_target: f32,
    wet_current: f32,
}

impl Distortion {
    const WET_SMOOTH_COEFF: f32 = 0.9995;

    pub fn new(sample_rate: f32) -> Self {
        let mut distortion = Self {
            enabled: false,
            sample_rate,
            drive: 0.2,
            tone: 4000.0,
            curve: vec![0.0; CURVE_SIZE],
            tone_filter: StereoBiquad::new(BiquadCoeffs::lowpass(4000.0, 0.707, sample_rate)),
            wet_target: 0.0,
            wet_current: 0.0,
        };
        distortion.rebuild_curve();
        distortion
    }

    /// Set drive (0.0 - 1.0); rebuilds the table only when it changes
    pub fn set_drive(&mut self, drive: f32) {
        let drive = drive.clamp(0.0, 1.0);
        if drive != self.drive {
            self.drive = drive;
            self.rebuild_curve();
        }
    }

    pub fn drive(&self) -> f32 {
        self.drive
    }

    /// Set tone filter cutoff in Hz (100 - 20000)
    pub fn set_tone(&mut self, tone_hz: f32) {
        self.tone = tone_hz.clamp(100.0, 20000.0);
        self.tone_filter
            .set_coeffs(BiquadCoeffs::lowpass(self.tone, 0.707, self.sample_rate));
    }

    pub fn tone(&self) -> f32 {
        self.tone
    }

    fn rebuild_curve(&mut self) {
        for (i, point) in self.curve.iter_mut().enumerate() {
            let x = i as f32 * 2.0 / (CURVE_SIZE - 1) as f32 - 1.0;
            *point = distortion_curve(x, self.drive);
        }
    }

    /// Read the table at `x` with linear interpolation
    #[inline]
    fn shape(&self, x: f32) -> f32 {
        let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * (CURVE_SIZE - 1) as f32;
        let index = pos as usize;
        if index >= CURVE_SIZE - 1 {
            return self.curve[CURVE_SIZE - 1];
        }
        let frac = pos - index as f32;
        self.curve[index] + frac * (self.curve[index + 1] - self.curve[index])
    }
}

impl Effect for Distortion {
    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled && self.wet_current < 0.0001 {
            return;
        }

        for frame in samples.chunks_exact_mut(2) {
            self.wet_current = Self::WET_SMOOTH_COEFF * self.wet_current
                + (1.0 - Self::WET_SMOOTH_COEFF) * self.wet_target;

            let (l, r) = self
                .tone_filter
                .process_frame(self.shape(frame[0]), self.shape(frame[1]));
            let wet = self.wet_current;
            frame[0] = frame[0] * (1.0 - wet) + l * wet;
            frame[1] = frame[1] * (1.0 - wet) + r * wet;
        }
    }

    fn reset(&mut self) {
        self.tone_filter.reset();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.wet_target = if enabled { 1.0 } else { 0.0 };
    }

    fn name(&self) -> &'static str {
        "Distortion"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_formula() {
        let c = 20.0 * PI / 180.0;
        // drive 0.5 -> k = 50
        let expected = 53.0 * 0.5 * c / (PI + 25.0);
        assert!((distortion_curve(0.5, 0.5) - expected).abs() < 1e-6);
        assert_eq!(distortion_curve(0.0, 0.9), 0.0);
        assert!((distortion_curve(-0.3, 0.4) + distortion_curve(0.3, 0.4)).abs() < 1e-6);
    }

    #[test]
    fn test_table_matches_curve() {
        let mut dist = Distortion::new(48000.0);
        dist.set_drive(0.7);
        for x in [-1.0, -0.42, 0.0, 0.13, 0.5, 1.0] {
            assert!((dist.shape(x) - distortion_curve(x, 0.7)).abs() < 1e-3, "x={}", x);
        }
    }

    #[test]
    fn test_parameter_clamping() {
        let mut dist = Distortion::new(48000.0);
        dist.set_drive(3.0);
        assert_eq!(dist.drive(), 1.0);
        dist.set_tone(50.0);
        assert_eq!(dist.tone(), 100.0);
    }

    #[test]
    fn test_disabled_is_bypass() {
        let mut dist = Distortion::new(48000.0);
        let mut samples = vec![0.5, -0.5, 0.25, -0.25];
        dist.process(&mut samples);
        assert_eq!(samples, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn test_enabled_shapes_signal() {
        let mut dist = Distortion::new(48000.0);
        dist.set_drive(1.0);
        dist.set_enabled(true);
        dist.wet_current = 1.0;
        let mut samples = vec![0.0; 2048];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = ((i / 2) as f32 * 0.01).sin() * 0.2;
        }
        let input = samples.clone();
        dist.process(&mut samples);
        assert!(samples.iter().zip(&input).any(|(a, b)| (a - b).abs() > 0.05));
    }
}
