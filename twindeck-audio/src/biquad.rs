//! Biquad filter building blocks (RBJ Audio EQ Cookbook)
//!
//! Coefficients are normalized so that `a0 == 1`. The field naming
//! follows the rest of the codebase: `a*` are feed-forward terms,
//! `b*` are feedback terms.

use std::f32::consts::PI;

/// Normalized biquad coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    a0: f32,
    a1: f32,
    a2: f32,
    b1: f32,
    b2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    /// Pass-through (unity gain, no phase shift)
    pub const fn identity() -> Self {
        Self {
            a0: 1.0,
            a1: 0.0,
            a2: 0.0,
            b1: 0.0,
            b2: 0.0,
        }
    }

    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            a0: b0 / a0,
            a1: b1 / a0,
            a2: b2 / a0,
            b1: a1 / a0,
            b2: a2 / a0,
        }
    }

    /// Angular frequency, kept just below Nyquist
    #[inline]
    fn omega(freq: f32, sample_rate: f32) -> f32 {
        let nyquist = sample_rate * 0.5;
        2.0 * PI * freq.clamp(1.0, nyquist * 0.999) / sample_rate
    }

    /// Second-order lowpass
    pub fn lowpass(freq: f32, q: f32, sample_rate: f32) -> Self {
        let omega = Self::omega(freq, sample_rate);
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q.max(1.0e-4));

        Self::normalized(
            (1.0 - cos_omega) / 2.0,
            1.0 - cos_omega,
            (1.0 - cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        )
    }

    /// Second-order highpass
    pub fn highpass(freq: f32, q: f32, sample_rate: f32) -> Self {
        let omega = Self::omega(freq, sample_rate);
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q.max(1.0e-4));

        Self::normalized(
            (1.0 + cos_omega) / 2.0,
            -(1.0 + cos_omega),
            (1.0 + cos_omega) / 2.0,
            1.0 + alpha,
            -2.0 * cos_omega,
            1.0 - alpha,
        )
    }

    /// Low shelf with slope S = 1
    pub fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::identity();
        }

        let a = 10.0f32.powf(gain_db / 40.0);
        let omega = Self::omega(freq, sample_rate);
        let cos_omega = omega.cos();
        let alpha = omega.sin() / 2.0 * (2.0f32).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
            a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
            (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    /// High shelf with slope S = 1
    pub fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::identity();
        }

        let a = 10.0f32.powf(gain_db / 40.0);
        let omega = Self::omega(freq, sample_rate);
        let cos_omega = omega.cos();
        let alpha = omega.sin() / 2.0 * (2.0f32).sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
            a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
            (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    /// Peaking (bell) filter
    pub fn peaking(freq: f32, q: f32, gain_db: f32, sample_rate: f32) -> Self {
        if gain_db.abs() < 0.01 {
            return Self::identity();
        }

        let a = 10.0f32.powf(gain_db / 40.0);
        let omega = Self::omega(freq, sample_rate);
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q.max(1.0e-4));

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_omega,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_omega,
            1.0 - alpha / a,
        )
    }
}

/// Biquad filter state for a single channel
#[derive(Debug, Default, Clone)]
pub struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, input: f32, coeffs: &BiquadCoeffs) -> f32 {
        let output = coeffs.a0 * input + coeffs.a1 * self.x1 + coeffs.a2 * self.x2
            - coeffs.b1 * self.y1
            - coeffs.b2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        // Flush denormals so long silent tails stay cheap
        self.y1 = if output.abs() < 1.0e-20 { 0.0 } else { output };

        output
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Stereo biquad sharing one coefficient set
#[derive(Debug, Default, Clone)]
pub struct StereoBiquad {
    coeffs: BiquadCoeffs,
    left: BiquadState,
    right: BiquadState,
}

impl StereoBiquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            left: BiquadState::default(),
            right: BiquadState::default(),
        }
    }

    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        (
            self.left.process(left, &self.coeffs),
            self.right.process(right, &self.coeffs),
        )
    }

    /// Filter stereo interleaved samples in place
    pub fn process(&mut self, samples: &mut [f32]) {
        for frame in samples.chunks_exact_mut(2) {
            let (l, r) = self.process_frame(frame[0], frame[1]);
            frame[0] = l;
            frame[1] = r;
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}
