//! Monophonic synthesizer
//!
//! One voice sounds at a time. A new note-on cuts the previous voice over
//! a short release (last-note priority) and the old voice keeps rendering
//! its tail in a releasing list until it is disposed.

mod envelope;
mod oscillator;
mod voice;

pub use envelope::{AdsrSettings, Envelope, EnvelopeStage, ReleaseCurve};
pub use oscillator::{note_frequency, Oscillator, Waveform};
pub use voice::{Voice, VoiceStage};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Release time used when a new note cuts the previous one
pub const CUTOVER_RELEASE_SECS: f32 = 0.005;

/// Settings for one oscillator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OscillatorSettings {
    pub waveform: Waveform,
    /// Whole-octave shift
    pub octave: i32,
    /// Fine shift in semitones
    pub fine: f32,
    /// Mix level (0.0 - 1.0)
    pub level: f32,
}

impl Default for OscillatorSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Saw,
            octave: 0,
            fine: 0.0,
            level: 0.5,
        }
    }
}

/// Full synth patch
#[derive(Debug, Clone, PartialEq)]
pub struct SynthSettings {
    pub osc1: OscillatorSettings,
    pub osc2: OscillatorSettings,
    pub noise_level: f32,
    /// Resting filter cutoff in Hz
    pub filter_cutoff: f32,
    /// Filter Q
    pub filter_resonance: f32,
    pub filter_env: AdsrSettings,
    /// Hz added to the cutoff at full filter envelope
    pub filter_env_amount: f32,
    pub amp_env: AdsrSettings,
    pub output_level: f32,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            osc1: OscillatorSettings::default(),
            osc2: OscillatorSettings {
                waveform: Waveform::Square,
                octave: -1,
                fine: 0.07,
                level: 0.3,
            },
            noise_level: 0.0,
            filter_cutoff: 1200.0,
            filter_resonance: 1.0,
            filter_env: AdsrSettings {
                attack: 0.005,
                decay: 0.25,
                sustain: 0.3,
                release: 0.3,
            },
            filter_env_amount: 3000.0,
            amp_env: AdsrSettings::default(),
            output_level: 0.6,
        }
    }
}

impl SynthSettings {
    /// Frequencies of both oscillators for `note`
    pub fn oscillator_frequencies(&self, note: u8) -> [f32; 2] {
        [
            note_frequency(note, self.osc1.octave, self.osc1.fine),
            note_frequency(note, self.osc2.octave, self.osc2.fine),
        ]
    }
}

/// Voice manager for the monophonic synth
pub struct VoiceEngine {
    sample_rate: f32,
    settings: SynthSettings,
    settle_secs: f32,
    active: Option<Voice>,
    releasing: Vec<Voice>,
    next_id: u64,
    rng: SmallRng,
    scratch: Vec<f32>,
}

impl VoiceEngine {
    /// `settle_secs` is the margin kept after a release before a voice is dropped
    pub fn new(sample_rate: u32, settle_secs: f32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            settings: SynthSettings::default(),
            settle_secs: settle_secs.max(0.0),
            active: None,
            releasing: Vec::with_capacity(4),
            next_id: 1,
            rng: SmallRng::from_entropy(),
            scratch: Vec::new(),
        }
    }

    pub fn settings(&self) -> &SynthSettings {
        &self.settings
    }

    /// Replace the patch; a sounding voice follows without retriggering
    pub fn set_settings(&mut self, settings: SynthSettings) {
        if let Some(voice) = self.active.as_mut() {
            voice.update(&settings);
        }
        self.settings = settings;
    }

    /// Start `note`, cutting off any sounding voice
    pub fn note_on(&mut self, note: u8, velocity: f32) {
        if let Some(mut previous) = self.active.take() {
            previous.force_release(CUTOVER_RELEASE_SECS);
            debug!("Voice {} cut over by note {}", previous.id(), note);
            self.releasing.push(previous);
        }

        let rng = SmallRng::seed_from_u64(self.rng.gen());
        let mut voice = Voice::new(
            self.next_id,
            note.min(127),
            velocity,
            &self.settings,
            self.sample_rate,
            self.settle_secs,
            rng,
        );
        self.next_id += 1;
        voice.start();
        self.active = Some(voice);
    }

    /// Release the sounding voice if it is playing `note`
    pub fn note_off(&mut self, note: u8) {
        if self.active.as_ref().map(Voice::note) != Some(note) {
            return;
        }
        if let Some(mut voice) = self.active.take() {
            voice.release();
            self.releasing.push(voice);
        }
    }

    /// Release whatever is sounding
    pub fn all_notes_off(&mut self) {
        if let Some(mut voice) = self.active.take() {
            voice.release();
            self.releasing.push(voice);
        }
    }

    /// Drop every voice immediately
    pub fn panic(&mut self) {
        if let Some(mut voice) = self.active.take() {
            voice.dispose();
        }
        for voice in self.releasing.iter_mut() {
            voice.dispose();
        }
        self.releasing.clear();
    }

    /// The sounding voice, if any
    pub fn active_voice(&self) -> Option<&Voice> {
        self.active.as_ref()
    }

    /// Voices still rendering their release tails
    pub fn releasing_voices(&self) -> &[Voice] {
        &self.releasing
    }

    pub fn sounding_count(&self) -> usize {
        self.active
            .iter()
            .filter(|v| v.stage() == VoiceStage::Sounding)
            .count()
    }

    /// True when nothing is sounding or releasing
    pub fn is_silent(&self) -> bool {
        self.active.is_none() && self.releasing.is_empty()
    }

    /// Render into stereo interleaved `out` (overwrites)
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        if self.is_silent() {
            out.fill(0.0);
            return;
        }

        self.scratch.clear();
        self.scratch.resize(frames, 0.0);
        if let Some(voice) = self.active.as_mut() {
            voice.render_add(&mut self.scratch);
        }
        for voice in self.releasing.iter_mut() {
            voice.render_add(&mut self.scratch);
        }

        let before = self.releasing.len();
        self.releasing.retain(|v| v.stage() != VoiceStage::Disposed);
        if self.releasing.len() != before {
            debug!("Disposed {} voice(s)", before - self.releasing.len());
        }

        for (frame, &s) in out.chunks_exact_mut(2).zip(self.scratch.iter()) {
            frame[0] = s;
            frame[1] = s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48000;

    fn render_secs(engine: &mut VoiceEngine, secs: f32) -> Vec<f32> {
        let mut all = Vec::new();
        let mut block = vec![0.0; 256];
        let blocks = (secs * SR as f32 / 128.0).ceil() as usize;
        for _ in 0..blocks {
            engine.render(&mut block);
            all.extend_from_slice(&block);
        }
        all
    }

    #[test]
    fn test_note_on_builds_sounding_voice() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        engine.note_on(69, 0.8);
        let voice = engine.active_voice().unwrap();
        assert_eq!(voice.stage(), VoiceStage::Sounding);
        assert_eq!(voice.note(), 69);
        assert_eq!(engine.sounding_count(), 1);
    }

    #[test]
    fn test_note_on_cuts_previous_voice() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        engine.note_on(60, 1.0);
        render_secs(&mut engine, 0.05);
        engine.note_on(64, 1.0);

        assert_eq!(engine.sounding_count(), 1);
        assert_eq!(engine.active_voice().unwrap().note(), 64);
        assert_eq!(engine.releasing_voices().len(), 1);
        assert_eq!(engine.releasing_voices()[0].stage(), VoiceStage::Releasing);
        assert_eq!(engine.releasing_voices()[0].note(), 60);
    }

    #[test]
    fn test_cut_voice_disposed_after_cutover_and_settle() {
        let mut engine = VoiceEngine::new(SR, 0.02);
        engine.note_on(60, 1.0);
        engine.note_on(64, 1.0);
        render_secs(&mut engine, 0.01);
        assert_eq!(engine.releasing_voices().len(), 1);
        render_secs(&mut engine, 0.03);
        assert!(engine.releasing_voices().is_empty());
    }

    #[test]
    fn test_note_off_releases_then_disposes() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        let mut settings = SynthSettings::default();
        settings.amp_env.release = 0.1;
        settings.filter_env.release = 0.2;
        engine.set_settings(settings);

        engine.note_on(69, 1.0);
        render_secs(&mut engine, 0.1);
        engine.note_off(69);
        assert!(engine.active_voice().is_none());
        assert_eq!(engine.releasing_voices()[0].stage(), VoiceStage::Releasing);

        // max(0.1, 0.2) + 0.05 settle
        render_secs(&mut engine, 0.2);
        assert_eq!(engine.releasing_voices().len(), 1);
        render_secs(&mut engine, 0.06);
        assert!(engine.is_silent());
    }

    #[test]
    fn test_note_off_for_other_note_ignored() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        engine.note_on(60, 1.0);
        engine.note_on(64, 1.0);
        engine.note_off(60);
        assert_eq!(engine.sounding_count(), 1);
    }

    #[test]
    fn test_live_update_does_not_retrigger() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        engine.note_on(69, 1.0);
        render_secs(&mut engine, 0.5);
        let level_before = engine.active_voice().unwrap().amplitude();

        let mut settings = engine.settings().clone();
        settings.osc1.octave = 1;
        engine.set_settings(settings);
        render_secs(&mut engine, 0.01);

        let voice = engine.active_voice().unwrap();
        assert!((voice.amplitude() - level_before).abs() < 1e-4);
        assert!((voice.frequency_targets()[0] - 880.0).abs() < 1e-2);
        assert_eq!(voice.filter_envelope_stage(), EnvelopeStage::Sustain);
    }

    #[test]
    fn test_settings_snapshot_at_note_on() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        engine.note_on(69, 1.0);
        let mut settings = engine.settings().clone();
        settings.amp_env.release = 3.0;
        engine.set_settings(settings);
        assert_eq!(
            engine.active_voice().unwrap().settings().amp_env.release,
            AdsrSettings::default().release
        );
    }

    #[test]
    fn test_produces_sound_and_panic_silences() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        engine.note_on(57, 1.0);
        let out = render_secs(&mut engine, 0.1);
        assert!(out.iter().any(|s| s.abs() > 0.01));

        engine.panic();
        assert!(engine.is_silent());
        let out = render_secs(&mut engine, 0.01);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_all_notes_off() {
        let mut engine = VoiceEngine::new(SR, 0.05);
        engine.note_on(60, 1.0);
        engine.all_notes_off();
        assert_eq!(engine.sounding_count(), 0);
        assert_eq!(engine.releasing_voices().len(), 1);
    }
}
