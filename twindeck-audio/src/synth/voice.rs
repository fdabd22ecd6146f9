//! A single synthesizer voice

use super::envelope::{Envelope, EnvelopeStage, ReleaseCurve};
use super::oscillator::{note_frequency, Oscillator};
use super::SynthSettings;
use crate::biquad::{BiquadCoeffs, BiquadState};
use crate::param::SmoothedParam;
use rand::rngs::SmallRng;
use rand::Rng;

/// Lifecycle of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStage {
    /// Built but not yet triggered
    Idle,
    Sounding,
    Releasing,
    /// Silent and ready to drop
    Disposed,
}

/// Time constant for live parameter changes on a sounding voice
const LIVE_SMOOTHING_SECS: f32 = 0.01;
/// Filter coefficients are refreshed every this many samples
const CONTROL_INTERVAL: usize = 16;
const MIN_CUTOFF: f32 = 20.0;
const MAX_CUTOFF: f32 = 20000.0;

/// Two oscillators and noise through an enveloped lowpass and an amp envelope
pub struct Voice {
    id: u64,
    note: u8,
    velocity: f32,
    stage: VoiceStage,
    sample_rate: f32,
    /// Settings captured at note-on; envelopes always use these
    settings: SynthSettings,

    osc: [Oscillator; 2],
    osc_freq: [SmoothedParam; 2],
    osc_level: [SmoothedParam; 2],
    noise_level: SmoothedParam,
    rng: SmallRng,

    cutoff: SmoothedParam,
    env_amount: SmoothedParam,
    resonance: SmoothedParam,
    filter: BiquadState,
    filter_coeffs: BiquadCoeffs,
    control_counter: usize,

    filter_env: Envelope,
    amp_env: Envelope,
    output_level: SmoothedParam,

    /// Samples rendered since release began
    release_elapsed: usize,
    /// Samples after release start when the voice may be dropped
    dispose_after: usize,
    settle_secs: f32,
}

impl Voice {
    pub(crate) fn new(
        id: u64,
        note: u8,
        velocity: f32,
        settings: &SynthSettings,
        sample_rate: f32,
        settle_secs: f32,
        rng: SmallRng,
    ) -> Self {
        let param = |v: f32| SmoothedParam::new(v, LIVE_SMOOTHING_SECS, sample_rate);
        let freqs = settings.oscillator_frequencies(note);

        Self {
            id,
            note,
            velocity: velocity.clamp(0.0, 1.0),
            stage: VoiceStage::Idle,
            sample_rate,
            settings: settings.clone(),
            osc: [
                Oscillator::new(settings.osc1.waveform),
                Oscillator::new(settings.osc2.waveform),
            ],
            osc_freq: [param(freqs[0]), param(freqs[1])],
            osc_level: [param(settings.osc1.level), param(settings.osc2.level)],
            noise_level: param(settings.noise_level),
            rng,
            cutoff: param(settings.filter_cutoff),
            env_amount: param(settings.filter_env_amount),
            resonance: param(settings.filter_resonance),
            filter: BiquadState::default(),
            filter_coeffs: BiquadCoeffs::identity(),
            control_counter: 0,
            filter_env: Envelope::new(settings.filter_env, ReleaseCurve::Linear, sample_rate),
            amp_env: Envelope::new(settings.amp_env, ReleaseCurve::Exponential, sample_rate),
            output_level: param(settings.output_level),
            release_elapsed: 0,
            dispose_after: 0,
            settle_secs,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn stage(&self) -> VoiceStage {
        self.stage
    }

    /// Settings captured when the note started
    pub fn settings(&self) -> &SynthSettings {
        &self.settings
    }

    /// Current amplitude envelope level
    pub fn amplitude(&self) -> f32 {
        self.amp_env.level()
    }

    /// Oscillator frequencies the voice is heading toward
    pub fn frequency_targets(&self) -> [f32; 2] {
        [self.osc_freq[0].target(), self.osc_freq[1].target()]
    }

    /// Idle -> Sounding
    pub(crate) fn start(&mut self) {
        if self.stage != VoiceStage::Idle {
            return;
        }
        self.filter_env.trigger(1.0);
        self.amp_env.trigger(self.velocity);
        self.stage = VoiceStage::Sounding;
    }

    /// Follow new settings without retriggering the envelopes
    pub(crate) fn update(&mut self, settings: &SynthSettings) {
        let freqs = settings.oscillator_frequencies(self.note);
        for i in 0..2 {
            self.osc_freq[i].set_target(freqs[i]);
        }
        self.osc[0].set_waveform(settings.osc1.waveform);
        self.osc[1].set_waveform(settings.osc2.waveform);
        self.osc_level[0].set_target(settings.osc1.level);
        self.osc_level[1].set_target(settings.osc2.level);
        self.noise_level.set_target(settings.noise_level);
        self.cutoff.set_target(settings.filter_cutoff);
        self.env_amount.set_target(settings.filter_env_amount);
        self.resonance.set_target(settings.filter_resonance);
        self.output_level.set_target(settings.output_level);
    }

    /// Sounding -> Releasing using the note-on release times
    pub(crate) fn release(&mut self) {
        let amp = self.settings.amp_env.release;
        let filter = self.settings.filter_env.release;
        self.begin_release(amp, filter);
    }

    /// Cut the voice short; both envelopes close over `secs`
    pub(crate) fn force_release(&mut self, secs: f32) {
        self.begin_release(secs, secs);
    }

    fn begin_release(&mut self, amp_secs: f32, filter_secs: f32) {
        match self.stage {
            VoiceStage::Idle => {
                self.stage = VoiceStage::Disposed;
                return;
            }
            VoiceStage::Disposed => return,
            VoiceStage::Sounding | VoiceStage::Releasing => {}
        }

        let amp_secs = amp_secs.max(0.0);
        let filter_secs = filter_secs.max(0.0);
        self.amp_env.release_over(amp_secs);
        self.filter_env.release_over(filter_secs);
        self.release_elapsed = 0;
        self.dispose_after =
            ((amp_secs.max(filter_secs) + self.settle_secs) * self.sample_rate).ceil() as usize;
        self.stage = VoiceStage::Releasing;
    }

    /// Mark the voice finished immediately
    pub(crate) fn dispose(&mut self) {
        self.stage = VoiceStage::Disposed;
    }

    fn refresh_filter(&mut self) {
        let env = self.filter_env.level();
        let base = self.cutoff.advance(CONTROL_INTERVAL);
        let amount = self.env_amount.advance(CONTROL_INTERVAL);
        let cutoff = (base + amount * env).clamp(MIN_CUTOFF, MAX_CUTOFF);
        let q = self.resonance.advance(CONTROL_INTERVAL).max(0.1);
        self.filter_coeffs = BiquadCoeffs::lowpass(cutoff, q, self.sample_rate);
    }

    /// Add this voice's mono output into `out`
    pub(crate) fn render_add(&mut self, out: &mut [f32]) {
        if matches!(self.stage, VoiceStage::Idle | VoiceStage::Disposed) {
            return;
        }

        for sample in out.iter_mut() {
            if self.control_counter == 0 {
                self.refresh_filter();
            }
            self.control_counter = (self.control_counter + 1) % CONTROL_INTERVAL;

            let f1 = self.osc_freq[0].next();
            let f2 = self.osc_freq[1].next();
            let mut mix = self.osc[0].next(f1, self.sample_rate) * self.osc_level[0].next()
                + self.osc[1].next(f2, self.sample_rate) * self.osc_level[1].next();
            let noise_level = self.noise_level.next();
            if noise_level > 0.0 {
                mix += self.rng.gen_range(-1.0f32..1.0) * noise_level;
            }

            self.filter_env.next();
            let filtered = self.filter.process(mix, &self.filter_coeffs);
            let amp = self.amp_env.next();
            *sample += filtered * amp * self.output_level.next();
        }

        if self.stage == VoiceStage::Releasing {
            self.release_elapsed += out.len();
            if self.release_elapsed >= self.dispose_after {
                self.stage = VoiceStage::Disposed;
            }
        }
    }

    pub fn filter_envelope_stage(&self) -> EnvelopeStage {
        self.filter_env.stage()
    }
}
