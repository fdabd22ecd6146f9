//! Signal channel - one deck's audio path
//!
//! Fixed chain: source (+ external input) -> gain -> pan -> filter ->
//! 3-band EQ -> output, with a meter tap on the output. Every
//! parameter is ramped through a [`SmoothedParam`]; filter and EQ
//! coefficients are recomputed once per render block from the ramped
//! values.

use crate::biquad::{BiquadCoeffs, StereoBiquad};
use crate::error::SourceError;
use crate::param::SmoothedParam;
use crate::source::{AudioBuffer, BufferSource, SourceHandle, SourceStatus};
use crate::state::{DeckChannelState, EqBand, SourceKind, EQ_MAX_DB, EQ_MIN_DB};
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;
use tracing::warn;
use twindeck_analysis::MeterTap;

/// Low shelf corner frequency
pub const EQ_LOW_FREQ: f32 = 320.0;
/// Mid peak center frequency
pub const EQ_MID_FREQ: f32 = 1000.0;
/// High shelf corner frequency
pub const EQ_HIGH_FREQ: f32 = 3200.0;
const EQ_MID_Q: f32 = 1.0;

/// Cutoff where the highpass does nothing audible
pub const HIGHPASS_NEUTRAL_HZ: f32 = 20.0;
/// Cutoff where the lowpass does nothing audible
pub const LOWPASS_NEUTRAL_HZ: f32 = 20000.0;

/// Which response the deck filter is using
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Lowpass,
    Highpass,
}

impl FilterMode {
    /// Cutoff at which this mode is fully open
    pub fn neutral_cutoff(self) -> f32 {
        match self {
            FilterMode::Lowpass => LOWPASS_NEUTRAL_HZ,
            FilterMode::Highpass => HIGHPASS_NEUTRAL_HZ,
        }
    }
}

/// Highpass branch of the filter knob: 20 Hz at 0, 20 kHz at 1
pub fn highpass_cutoff(knob: f32) -> f32 {
    HIGHPASS_NEUTRAL_HZ * 1000.0f32.powf(knob)
}

/// Lowpass branch of the filter knob: 20 kHz at 0, 20 Hz at -1
pub fn lowpass_cutoff(knob: f32) -> f32 {
    LOWPASS_NEUTRAL_HZ * 10.0f32.powf(3.0 * knob)
}

/// Map a filter knob in [-1, 1] to its mode and cutoff
pub fn filter_target(knob: f32) -> (FilterMode, f32) {
    let knob = if knob.is_finite() { knob.clamp(-1.0, 1.0) } else { 0.0 };
    if knob > 0.0 {
        (FilterMode::Highpass, highpass_cutoff(knob))
    } else {
        (FilterMode::Lowpass, lowpass_cutoff(knob))
    }
}

/// Equal-power stereo panner gains applied to a stereo frame
#[inline]
pub fn pan_frame(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let x = (pan + 1.0) * FRAC_PI_2;
        (left + right * x.cos(), right * x.sin())
    } else {
        let x = pan * FRAC_PI_2;
        (left * x.cos(), right + left * x.sin())
    }
}

/// One deck's signal path and playback transport
pub struct SignalChannel {
    sample_rate: f32,
    output_rate: u32,
    source: Option<BufferSource>,
    next_handle: u64,
    source_kind: SourceKind,

    gain: SmoothedParam,
    pan: SmoothedParam,
    rate: SmoothedParam,
    cutoff: SmoothedParam,
    resonance: SmoothedParam,
    filter_mode: FilterMode,
    eq_gains: [SmoothedParam; 3],

    filter: StereoBiquad,
    eq: [StereoBiquad; 3],
    meter: MeterTap,
}

impl SignalChannel {
    /// Create a channel rendering at `sample_rate` with the given ramp time constant
    pub fn new(sample_rate: u32, smoothing_secs: f32) -> Self {
        let sr = sample_rate as f32;
        let param = |value: f32| SmoothedParam::new(value, smoothing_secs, sr);

        Self {
            sample_rate: sr,
            output_rate: sample_rate,
            source: None,
            next_handle: 1,
            source_kind: SourceKind::LocalBuffer,
            gain: param(1.0),
            pan: param(0.0),
            rate: param(1.0),
            cutoff: param(LOWPASS_NEUTRAL_HZ),
            resonance: param(0.707),
            filter_mode: FilterMode::Lowpass,
            eq_gains: [param(0.0), param(0.0), param(0.0)],
            filter: StereoBiquad::new(BiquadCoeffs::lowpass(LOWPASS_NEUTRAL_HZ, 0.707, sr)),
            eq: Default::default(),
            meter: MeterTap::default(),
        }
    }

    /// Replace any existing source with a fresh one bound to `buffer`
    pub fn connect_playback_source(&mut self, buffer: Arc<AudioBuffer>) -> SourceHandle {
        self.disconnect_source();

        let handle = SourceHandle::new(self.next_handle);
        self.next_handle += 1;
        self.source = Some(BufferSource::new(handle, buffer, self.output_rate));
        handle
    }

    /// Stop and drop the current source, if any
    pub fn disconnect_source(&mut self) {
        // Idle and finished sources have nothing to stop
        if let Some(mut old) = self.source.take().filter(|s| s.status() == SourceStatus::Playing) {
            if let Err(e) = old.stop() {
                warn!("Source {} stop on disconnect: {}", old.handle().id(), e);
            }
        }
    }

    /// Start the connected source at `offset_secs`
    pub fn start_source(&mut self, offset_secs: f64) -> Result<(), SourceError> {
        self.source
            .as_mut()
            .ok_or(SourceError::NoSource)?
            .start(offset_secs)
    }

    /// Stop the connected source
    pub fn stop_source(&mut self) -> Result<(), SourceError> {
        self.source.as_mut().ok_or(SourceError::NoSource)?.stop()
    }

    /// Start playback at `offset_secs`, reconnecting when the current
    /// source has already been used
    pub fn play_from(&mut self, offset_secs: f64) -> Result<SourceHandle, SourceError> {
        let source = self.source.as_ref().ok_or(SourceError::NoSource)?;
        if source.status() != SourceStatus::Idle {
            let buffer = Arc::clone(source.buffer());
            self.connect_playback_source(buffer);
        }
        self.start_source(offset_secs)?;
        self.source
            .as_ref()
            .map(BufferSource::handle)
            .ok_or(SourceError::NoSource)
    }

    pub fn source_handle(&self) -> Option<SourceHandle> {
        self.source.as_ref().map(BufferSource::handle)
    }

    pub fn source_status(&self) -> Option<SourceStatus> {
        self.source.as_ref().map(BufferSource::status)
    }

    pub fn buffer(&self) -> Option<&Arc<AudioBuffer>> {
        self.source.as_ref().map(BufferSource::buffer)
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    /// Ramp every parameter toward the deck state.
    ///
    /// Does nothing for external sources, which play outside the graph.
    pub fn apply_parameters(&mut self, state: &DeckChannelState) {
        self.source_kind = state.source_kind;
        if state.source_kind != SourceKind::LocalBuffer {
            return;
        }

        self.gain.set_target(state.gain.clamp(0.0, 2.0));
        self.pan.set_target(state.pan.clamp(-1.0, 1.0));
        self.rate.set_target(state.effective_rate());
        self.resonance.set_target(state.resonance.clamp(0.1, 20.0));

        let (mode, cutoff) = filter_target(state.filter);
        if mode != self.filter_mode {
            // Switch at the new mode's open position, then sweep
            self.filter_mode = mode;
            self.cutoff.set_immediate(mode.neutral_cutoff());
        }
        self.cutoff.set_target(cutoff);

        for (param, band) in self.eq_gains.iter_mut().zip(EqBand::ALL) {
            param.set_target(state.eq_gain(band).clamp(EQ_MIN_DB, EQ_MAX_DB));
        }
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.filter_mode
    }

    /// Cutoff the filter is heading toward
    pub fn filter_cutoff_target(&self) -> f32 {
        self.cutoff.target()
    }

    pub fn filter_cutoff(&self) -> f32 {
        self.cutoff.value()
    }

    pub fn gain(&self) -> f32 {
        self.gain.value()
    }

    pub fn eq_gain(&self, band: EqBand) -> f32 {
        self.eq_gains[band as usize].value()
    }

    /// Playback rate currently applied
    pub fn rate(&self) -> f32 {
        self.rate.value()
    }

    /// Render one block into `out` (stereo interleaved, overwritten).
    /// `external` is summed in before the gain stage.
    pub fn process(&mut self, out: &mut [f32], external: Option<&[f32]>) {
        match self.source.as_mut() {
            Some(source) => source.render(out, &mut self.rate),
            None => {
                out.fill(0.0);
                self.rate.advance(out.len() / 2);
            }
        }

        if let Some(ext) = external {
            for (o, e) in out.iter_mut().zip(ext) {
                *o += e;
            }
        }

        for frame in out.chunks_exact_mut(2) {
            let gain = self.gain.next();
            let pan = self.pan.next();
            let (l, r) = pan_frame(frame[0] * gain, frame[1] * gain, pan);
            frame[0] = l;
            frame[1] = r;
        }

        let frames = out.len() / 2;
        self.update_filter(frames);
        self.filter.process(out);

        self.update_eq(frames);
        for band in self.eq.iter_mut() {
            band.process(out);
        }

        self.meter.push_interleaved(out);
    }

    fn update_filter(&mut self, frames: usize) {
        let cutoff = self.cutoff.advance(frames);
        let q = self.resonance.advance(frames);
        let coeffs = match self.filter_mode {
            FilterMode::Lowpass => BiquadCoeffs::lowpass(cutoff, q, self.sample_rate),
            FilterMode::Highpass => BiquadCoeffs::highpass(cutoff, q, self.sample_rate),
        };
        self.filter.set_coeffs(coeffs);
    }

    fn update_eq(&mut self, frames: usize) {
        let sr = self.sample_rate;
        let low = self.eq_gains[0].advance(frames);
        let mid = self.eq_gains[1].advance(frames);
        let high = self.eq_gains[2].advance(frames);
        self.eq[0].set_coeffs(BiquadCoeffs::low_shelf(EQ_LOW_FREQ, low, sr));
        self.eq[1].set_coeffs(BiquadCoeffs::peaking(EQ_MID_FREQ, EQ_MID_Q, mid, sr));
        self.eq[2].set_coeffs(BiquadCoeffs::high_shelf(EQ_HIGH_FREQ, high, sr));
    }

    /// Copy the most recent output (mono, oldest first) for level analysis
    pub fn copy_meter_window(&self, out: &mut Vec<f32>) {
        self.meter.copy_window(out);
    }

    /// Drop the source and clear all filter and meter state
    pub fn reset(&mut self) {
        self.disconnect_source();
        self.filter.reset();
        for band in self.eq.iter_mut() {
            band.reset();
        }
        self.meter.reset();
    }
}
