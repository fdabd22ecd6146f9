//! FFT-based level meter for per-frame UI feedback
//!
//! A [`MeterTap`] keeps a short history of the signal and is cheap enough
//! to feed from the audio thread. A [`LevelMeter`] computes a windowed FFT
//! over such a history, maps each bin magnitude onto a decibel range and
//! reports the mean of the normalized bins. The value is meant for VU
//! displays, not for DSP decisions.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Default analysis window size
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Bins at or below this level read as 0.0
const MIN_DECIBELS: f32 = -100.0;
/// Bins at or above this level read as 1.0
const MAX_DECIBELS: f32 = -30.0;

/// Ring of the most recent mono samples
#[derive(Debug, Clone)]
pub struct MeterTap {
    history: Vec<f32>,
    write_pos: usize,
}

impl MeterTap {
    /// Create a tap holding `size` samples (rounded up to a power of two)
    pub fn new(size: usize) -> Self {
        Self {
            history: vec![0.0; window_size(size)],
            write_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Feed stereo interleaved samples (downmixed to mono)
    pub fn push_interleaved(&mut self, samples: &[f32]) {
        for frame in samples.chunks_exact(2) {
            self.push_sample((frame[0] + frame[1]) * 0.5);
        }
    }

    /// Feed mono samples
    pub fn push_mono(&mut self, samples: &[f32]) {
        for &s in samples {
            self.push_sample(s);
        }
    }

    #[inline]
    fn push_sample(&mut self, sample: f32) {
        let len = self.history.len();
        self.history[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % len;
    }

    /// Sample `i` of the window, oldest first
    #[inline]
    fn get(&self, i: usize) -> f32 {
        self.history[(self.write_pos + i) % self.history.len()]
    }

    /// Copy the history into `out`, oldest sample first
    pub fn copy_window(&self, out: &mut Vec<f32>) {
        out.clear();
        out.extend((0..self.history.len()).map(|i| self.get(i)));
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
    }
}

impl Default for MeterTap {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

fn window_size(size: usize) -> usize {
    size.max(32).next_power_of_two()
}

/// Frequency-domain level meter
pub struct LevelMeter {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    tap: MeterTap,
    /// Temporal smoothing between successive reads (0.0 - 1.0)
    smoothing: f32,
    smoothed_bins: Vec<f32>,
    /// Pre-allocated FFT buffer to avoid allocation in level()
    fft_buffer: Vec<Complex<f32>>,
}

impl LevelMeter {
    /// Create a new meter with the given FFT size (rounded up to a power of two)
    pub fn new(fft_size: usize) -> Self {
        let fft_size = window_size(fft_size);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Pre-compute Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / fft_size as f32).cos()))
            .collect();

        Self {
            fft_size,
            fft,
            window,
            tap: MeterTap::new(fft_size),
            smoothing: 0.8,
            smoothed_bins: vec![0.0; fft_size / 2],
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    /// Analysis window size
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Set temporal smoothing (0.0 = none, 0.99 = very slow)
    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 0.99);
    }

    /// Feed stereo interleaved samples (downmixed to mono)
    pub fn push_interleaved(&mut self, samples: &[f32]) {
        self.tap.push_interleaved(samples);
    }

    /// Feed mono samples
    pub fn push_mono(&mut self, samples: &[f32]) {
        self.tap.push_mono(samples);
    }

    /// Compute normalized per-bin magnitudes (0.0 - 1.0) into `out`
    ///
    /// `out` is resized to `fft_size / 2`.
    pub fn bins(&mut self, out: &mut Vec<f32>) {
        self.analyze();
        out.clear();
        out.extend(self.smoothed_bins.iter().map(|&m| Self::normalize(m)));
    }

    /// Current level: mean of normalized bin magnitudes (0.0 - 1.0)
    pub fn level(&mut self) -> f32 {
        self.analyze();
        let sum: f32 = self.smoothed_bins.iter().map(|&m| Self::normalize(m)).sum();
        sum / self.smoothed_bins.len() as f32
    }

    /// Level of a window copied out of a [`MeterTap`], oldest sample
    /// first. The window replaces the meter's own history; smoothing
    /// carries over from previous reads.
    pub fn level_of(&mut self, window: &[f32]) -> f32 {
        self.tap.reset();
        self.tap.push_mono(window);
        self.level()
    }

    /// Clear history and smoothing state
    pub fn reset(&mut self) {
        self.tap.reset();
        self.smoothed_bins.fill(0.0);
    }

    fn analyze(&mut self) {
        // Oldest sample first so the window lines up with time order
        for i in 0..self.fft_size {
            let sample = self.tap.get(i);
            self.fft_buffer[i] = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.fft_buffer);

        let scale = 1.0 / self.fft_size as f32;
        for (smoothed, bin) in self.smoothed_bins.iter_mut().zip(self.fft_buffer.iter()) {
            let magnitude = bin.norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
        }
    }

    /// Map a linear magnitude onto the 0.0 - 1.0 display range
    #[inline]
    fn normalize(magnitude: f32) -> f32 {
        if magnitude <= 0.0 {
            return 0.0;
        }
        let db = 20.0 * magnitude.log10();
        ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_silence_reads_zero() {
        let mut meter = LevelMeter::default();
        meter.push_mono(&[0.0; 512]);
        assert_eq!(meter.level(), 0.0);
    }

    #[test]
    fn test_signal_raises_level() {
        let mut meter = LevelMeter::default();
        meter.set_smoothing(0.0);
        meter.push_mono(&sine(1000.0, 48000.0, 512));
        let level = meter.level();
        assert!(level > 0.0, "expected non-zero level, got {}", level);
        assert!(level <= 1.0);
    }

    #[test]
    fn test_louder_signal_reads_higher() {
        let mut quiet = LevelMeter::default();
        let mut loud = LevelMeter::default();
        quiet.set_smoothing(0.0);
        loud.set_smoothing(0.0);

        let signal = sine(440.0, 48000.0, 512);
        let soft: Vec<f32> = signal.iter().map(|s| s * 0.01).collect();
        quiet.push_mono(&soft);
        loud.push_mono(&signal);

        assert!(loud.level() > quiet.level());
    }

    #[test]
    fn test_interleaved_downmix() {
        let mut meter = LevelMeter::default();
        meter.set_smoothing(0.0);
        // Left and right cancel out
        let stereo: Vec<f32> = (0..512)
            .flat_map(|i| {
                let s = (i as f32 * 0.1).sin();
                [s, -s]
            })
            .collect();
        meter.push_interleaved(&stereo);
        assert_eq!(meter.level(), 0.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut meter = LevelMeter::default();
        meter.set_smoothing(0.0);
        meter.push_mono(&sine(440.0, 48000.0, 512));
        assert!(meter.level() > 0.0);
        meter.reset();
        assert_eq!(meter.level(), 0.0);
    }

    #[test]
    fn test_tap_window_is_time_ordered() {
        let mut tap = MeterTap::new(32);
        let ramp: Vec<f32> = (0..40).map(|i| i as f32).collect();
        tap.push_mono(&ramp);

        let mut window = Vec::new();
        tap.copy_window(&mut window);
        assert_eq!(window.len(), 32);
        assert_eq!(window[0], 8.0);
        assert_eq!(window[31], 39.0);
    }

    #[test]
    fn test_level_of_tap_window_matches_direct_feed() {
        let signal = sine(440.0, 48000.0, 700);

        let mut direct = LevelMeter::default();
        direct.set_smoothing(0.0);
        direct.push_mono(&signal);

        let mut tap = MeterTap::default();
        tap.push_mono(&signal);
        let mut window = Vec::new();
        tap.copy_window(&mut window);

        let mut detached = LevelMeter::default();
        detached.set_smoothing(0.0);
        // Stale history must not leak into the reading
        detached.push_mono(&[0.9; 100]);
        let level = detached.level_of(&window);

        assert!(level > 0.0);
        assert!((level - direct.level()).abs() < 1e-6);
    }

    #[test]
    fn test_bins_length() {
        let mut meter = LevelMeter::new(300);
        assert_eq!(meter.fft_size(), 512);
        let mut bins = Vec::new();
        meter.bins(&mut bins);
        assert_eq!(bins.len(), 256);
    }
}
