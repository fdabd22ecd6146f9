//! Convolution reverb
//!
//! The impulse response is procedurally generated decaying noise. It is
//! convolved with a uniformly partitioned overlap-save FFT convolver:
//! the impulse is split into blocks of `B` samples, each block is
//! transformed once, and every incoming block of input is multiplied
//! against all of them through a frequency-domain delay line. Latency
//! is one block.
//!
//! Generating an impulse and transforming its partitions is expensive,
//! so it happens in [`ImpulseCache`] / [`ReverbKernel::new`] off the
//! render path. The render side only swaps a ready kernel in.

use super::Effect;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Convolution block size in samples
pub const REVERB_BLOCK: usize = 512;
/// Shortest decay the generator accepts
pub const MIN_DECAY_SECS: f32 = 0.05;
/// Longest decay the generator accepts
pub const MAX_DECAY_SECS: f32 = 10.0;
/// Exponent of the impulse decay envelope
const DECAY_EXPONENT: f32 = 2.5;

/// Stereo impulse response
#[derive(Debug, Clone)]
pub struct Impulse {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    sample_rate: u32,
}

impl Impulse {
    /// Generate decaying noise of `decay_secs`:
    /// `sample[i] = random(-1, 1) * (1 - i / len)^2.5`.
    ///
    /// Each channel is then scaled to unit energy, so the wet level of the
    /// reverb stays the same across decay times and `mix` alone sets it.
    pub fn generate(decay_secs: f32, sample_rate: u32, rng: &mut SmallRng) -> Self {
        let decay = decay_secs.clamp(MIN_DECAY_SECS, MAX_DECAY_SECS);
        let len = ((decay * sample_rate as f32).round() as usize).max(1);

        let mut channel = || {
            let mut samples: Vec<f32> = (0..len)
                .map(|i| {
                    let env = (1.0 - i as f32 / len as f32).powf(DECAY_EXPONENT);
                    rng.gen_range(-1.0f32..1.0) * env
                })
                .collect();
            let energy: f32 = samples.iter().map(|s| s * s).sum();
            if energy > 0.0 {
                let scale = energy.sqrt().recip();
                samples.iter_mut().for_each(|s| *s *= scale);
            }
            samples
        };

        let left = channel();
        let right = channel();
        Self {
            left,
            right,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Caches the impulse for the last requested decay time
pub struct ImpulseCache {
    sample_rate: u32,
    impulse: Option<Arc<Impulse>>,
    generations: u64,
    rng: SmallRng,
}

impl ImpulseCache {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            impulse: None,
            generations: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Impulse for `decay_secs` and whether it was generated by this call.
    ///
    /// A cached impulse is reused while its duration matches the
    /// requested decay to within one sample.
    pub fn get(&mut self, decay_secs: f32) -> (Arc<Impulse>, bool) {
        let decay = decay_secs.clamp(MIN_DECAY_SECS, MAX_DECAY_SECS);
        let tolerance = 1.0 / self.sample_rate as f32;

        if let Some(impulse) = &self.impulse {
            if (impulse.duration() - decay).abs() < tolerance {
                return (Arc::clone(impulse), false);
            }
        }

        let impulse = Arc::new(Impulse::generate(decay, self.sample_rate, &mut self.rng));
        self.generations += 1;
        debug!(
            "Generated reverb impulse: {:.2}s ({} samples)",
            impulse.duration(),
            impulse.len()
        );
        self.impulse = Some(Arc::clone(&impulse));
        (impulse, true)
    }

    /// Number of impulses generated so far
    pub fn generations(&self) -> u64 {
        self.generations
    }

    /// Currently cached impulse
    pub fn cached(&self) -> Option<&Arc<Impulse>> {
        self.impulse.as_ref()
    }
}

/// Uniformly partitioned overlap-save convolver for one channel
pub struct Convolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// Spectrum of each impulse partition (length 2B)
    partitions: Vec<Vec<Complex<f32>>>,
    /// Input spectra of the most recent blocks, newest at `fdl_pos`
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_pos: usize,
    /// Previous block followed by the block being filled
    input: Vec<f32>,
    fill: usize,
    /// Output of the last completed block
    output: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Convolver {
    /// Partition and transform `impulse` with block size `block`
    pub fn new(impulse: &[f32], block: usize, planner: &mut FftPlanner<f32>) -> Self {
        let block = block.max(1);
        let fft_size = block * 2;
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let partitions: Vec<Vec<Complex<f32>>> = impulse
            .chunks(block)
            .map(|chunk| {
                let mut part = vec![Complex::new(0.0, 0.0); fft_size];
                for (dst, &src) in part.iter_mut().zip(chunk) {
                    dst.re = src;
                }
                fft.process_with_scratch(&mut part, &mut scratch);
                part
            })
            .collect();
        let count = partitions.len().max(1);

        Self {
            block,
            fft,
            ifft,
            partitions,
            fdl: vec![vec![Complex::new(0.0, 0.0); fft_size]; count],
            fdl_pos: 0,
            input: vec![0.0; fft_size],
            fill: 0,
            output: vec![0.0; block],
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            accum: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
        }
    }

    /// Samples of delay between input and output
    pub fn latency(&self) -> usize {
        self.block
    }

    /// Number of impulse partitions
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Push one input sample and return one output sample
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        self.input[self.block + self.fill] = input;
        let out = self.output[self.fill];
        self.fill += 1;
        if self.fill == self.block {
            self.process_block();
            self.fill = 0;
        }
        out
    }

    fn process_block(&mut self) {
        let fft_size = self.block * 2;

        for (dst, &src) in self.spectrum.iter_mut().zip(&self.input) {
            *dst = Complex::new(src, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
        self.fdl[self.fdl_pos].copy_from_slice(&self.spectrum);

        self.accum.fill(Complex::new(0.0, 0.0));
        let count = self.fdl.len();
        for (k, part) in self.partitions.iter().enumerate() {
            let slot = &self.fdl[(self.fdl_pos + count - k) % count];
            for ((acc, x), h) in self.accum.iter_mut().zip(slot).zip(part) {
                *acc += x * h;
            }
        }

        self.ifft.process_with_scratch(&mut self.accum, &mut self.scratch);
        let norm = 1.0 / fft_size as f32;
        for (dst, src) in self.output.iter_mut().zip(&self.accum[self.block..]) {
            *dst = src.re * norm;
        }

        self.input.copy_within(self.block.., 0);
        self.fdl_pos = (self.fdl_pos + 1) % count;
    }

    pub fn reset(&mut self) {
        for slot in self.fdl.iter_mut() {
            slot.fill(Complex::new(0.0, 0.0));
        }
        self.input.fill(0.0);
        self.output.fill(0.0);
        self.fill = 0;
        self.fdl_pos = 0;
    }
}

/// Ready-to-install stereo convolution state for one impulse
pub struct ReverbKernel {
    left: Convolver,
    right: Convolver,
    duration: f32,
}

impl ReverbKernel {
    pub fn new(impulse: &Impulse, block: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            left: Convolver::new(&impulse.left, block, &mut planner),
            right: Convolver::new(&impulse.right, block, &mut planner),
            duration: impulse.duration(),
        }
    }

    /// Impulse duration in seconds
    pub fn duration(&self) -> f32 {
        self.duration
    }
}

/// Convolution reverb effect
pub struct ConvolutionReverb {
    enabled: bool,
    kernel: Option<ReverbKernel>,
    /// Wet/dry mix (0.0 - 1.0)
    mix: f32,
    wet_target: f32,
    wet_current: f32,
}

impl Default for ConvolutionReverb {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvolutionReverb {
    const WET_SMOOTH_COEFF: f32 = 0.9995;

    pub fn new() -> Self {
        Self {
            enabled: false,
            kernel: None,
            mix: 0.25,
            wet_target: 0.0,
            wet_current: 0.0,
        }
    }

    /// Install a new impulse; the previous kernel is returned for dropping
    /// off the render path
    pub fn set_kernel(&mut self, kernel: ReverbKernel) -> Option<ReverbKernel> {
        self.kernel.replace(kernel)
    }

    /// Duration of the installed impulse
    pub fn impulse_duration(&self) -> Option<f32> {
        self.kernel.as_ref().map(ReverbKernel::duration)
    }

    /// Set wet/dry mix (0.0 - 1.0)
    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }
}

impl Effect for ConvolutionReverb {
    fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled && self.wet_current < 0.0001 {
            return;
        }
        let Some(kernel) = self.kernel.as_mut() else {
            return;
        };

        for frame in samples.chunks_exact_mut(2) {
            self.wet_current = Self::WET_SMOOTH_COEFF * self.wet_current
                + (1.0 - Self::WET_SMOOTH_COEFF) * self.wet_target;

            let wet_l = kernel.left.process_sample(frame[0]);
            let wet_r = kernel.right.process_sample(frame[1]);

            let mix = self.mix * self.wet_current;
            frame[0] = frame[0] * (1.0 - mix) + wet_l * mix;
            frame[1] = frame[1] * (1.0 - mix) + wet_r * mix;
        }
    }

    fn reset(&mut self) {
        if let Some(kernel) = self.kernel.as_mut() {
            kernel.left.reset();
            kernel.right.reset();
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.wet_target = if enabled { 1.0 } else { 0.0 };
    }

    fn name(&self) -> &'static str {
        "Reverb"
    }
}
