//! Mixer - equal-power crossfader, pre-master bus and master gain

use crate::param::SmoothedParam;
use std::f32::consts::FRAC_PI_2;

/// Equal-power crossfader gains for position `x` (0.0 = full A, 1.0 = full B)
///
/// `gain_a^2 + gain_b^2 == 1` across the whole travel.
#[inline]
pub fn crossfader_gains(x: f32) -> (f32, f32) {
    let x = if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.5 };
    let gain_a = (x * FRAC_PI_2).cos().max(0.0);
    let gain_b = ((1.0 - x) * FRAC_PI_2).cos().max(0.0);
    (snap_zero(gain_a), snap_zero(gain_b))
}

/// cos(pi/2) is not exactly zero in floating point
#[inline]
fn snap_zero(gain: f32) -> f32 {
    if gain < 1.0e-6 {
        0.0
    } else {
        gain
    }
}

/// Crossfader and master section
pub struct Mixer {
    crossfader: f32,
    gain_a: SmoothedParam,
    gain_b: SmoothedParam,
    master: SmoothedParam,
}

impl Mixer {
    /// Create a mixer with the crossfader centered
    pub fn new(sample_rate: u32, smoothing_secs: f32) -> Self {
        let sr = sample_rate as f32;
        let (a, b) = crossfader_gains(0.5);
        Self {
            crossfader: 0.5,
            gain_a: SmoothedParam::new(a, smoothing_secs, sr),
            gain_b: SmoothedParam::new(b, smoothing_secs, sr),
            master: SmoothedParam::new(1.0, smoothing_secs, sr),
        }
    }

    /// Set crossfader position (0.0 - 1.0); gains ramp toward the new law values
    pub fn set_crossfader(&mut self, position: f32) {
        let (a, b) = crossfader_gains(position);
        self.crossfader = position.clamp(0.0, 1.0);
        self.gain_a.set_target(a);
        self.gain_b.set_target(b);
    }

    pub fn crossfader(&self) -> f32 {
        self.crossfader
    }

    /// Set master volume (0.0 - 2.0)
    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = if volume.is_finite() { volume } else { 1.0 };
        self.master.set_target(volume.clamp(0.0, 2.0));
    }

    pub fn master_volume(&self) -> f32 {
        self.master.target()
    }

    /// Current (ramped) crossfader gains
    pub fn gains(&self) -> (f32, f32) {
        (self.gain_a.value(), self.gain_b.value())
    }

    /// Sum both decks through their crossfader gains into `out`, plus an
    /// optional signal that bypasses the crossfader
    pub fn sum(&mut self, deck_a: &[f32], deck_b: &[f32], direct: Option<&[f32]>, out: &mut [f32]) {
        let len = out.len().min(deck_a.len()).min(deck_b.len());

        for i in (0..len).step_by(2) {
            let gain_a = self.gain_a.next();
            let gain_b = self.gain_b.next();
            out[i] = deck_a[i] * gain_a + deck_b[i] * gain_b;
            if i + 1 < len {
                out[i + 1] = deck_a[i + 1] * gain_a + deck_b[i + 1] * gain_b;
            }
        }

        if let Some(direct) = direct {
            for (o, d) in out[..len].iter_mut().zip(direct) {
                *o += d;
            }
        }
    }

    /// Apply master gain and the bus soft clipper in place
    pub fn apply_master(&mut self, samples: &mut [f32]) {
        for frame in samples.chunks_exact_mut(2) {
            let master = self.master.next();
            frame[0] = soft_clip(frame[0] * master);
            frame[1] = soft_clip(frame[1] * master);
        }
    }
}

/// Soft clip threshold
const SOFT_CLIP_THRESHOLD: f32 = 0.75;
/// Soft clip ceiling
const SOFT_CLIP_CEILING: f32 = 0.89;

/// Gentle soft clipper for the master bus
///
/// Transparent below the threshold; above it the signal approaches the
/// ceiling along an exponential knee.
#[inline(always)]
pub fn soft_clip(x: f32) -> f32 {
    let abs_x = x.abs();
    if abs_x <= SOFT_CLIP_THRESHOLD {
        return x;
    }

    let knee_width = SOFT_CLIP_CEILING - SOFT_CLIP_THRESHOLD;
    let ratio = (abs_x - SOFT_CLIP_THRESHOLD) / knee_width;
    let compressed = SOFT_CLIP_THRESHOLD + knee_width * (1.0 - (-ratio * 3.0).exp());
    x.signum() * compressed.min(SOFT_CLIP_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossfader_endpoints() {
        assert_eq!(crossfader_gains(0.0), (1.0, 0.0));
        assert_eq!(crossfader_gains(1.0), (0.0, 1.0));
    }

    #[test]
    fn test_crossfader_center() {
        let (a, b) = crossfader_gains(0.5);
        assert!((a - 0.7071).abs() < 1e-4);
        assert!((b - 0.7071).abs() < 1e-4);
    }

    #[test]
    fn test_crossfader_equal_power() {
        for i in 0..=100 {
            let x = i as f32 / 100.0;
            let (a, b) = crossfader_gains(x);
            assert!((a * a + b * b - 1.0).abs() < 1e-5, "x={} power={}", x, a * a + b * b);
            assert!((a - (0.5 * std::f32::consts::PI * x).cos()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_crossfader_is_ramped() {
        let mut mixer = Mixer::new(48000, 0.015);
        mixer.set_crossfader(0.0);
        let a = vec![1.0; 4];
        let b = vec![1.0; 4];
        let mut out = vec![0.0; 4];
        mixer.sum(&a, &b, None, &mut out);
        let (gain_a, gain_b) = mixer.gains();
        assert!(gain_a < 1.0 && gain_b > 0.0);
    }

    #[test]
    fn test_direct_input_bypasses_crossfader() {
        let mut mixer = Mixer::new(48000, 0.0);
        mixer.set_crossfader(0.0);
        let a = vec![0.0; 4];
        let b = vec![0.5; 4];
        let direct = vec![0.25; 4];
        let mut out = vec![0.0; 4];
        mixer.sum(&a, &b, Some(&direct), &mut out);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_soft_clip_transparent_and_bounded() {
        assert_eq!(soft_clip(0.5), 0.5);
        assert_eq!(soft_clip(-0.75), -0.75);
        assert!(soft_clip(10.0) <= SOFT_CLIP_CEILING);
        assert!(soft_clip(-10.0) >= -SOFT_CLIP_CEILING);
    }
}
