//! Render graph shared between the frame loop and the device callback
//!
//! ```text
//! synth ──┬──> channel A ──[fx]──> xfade A ──┐
//!         ├──> channel B ──[fx]──> xfade B ──┼──> pre-master ──> meter
//!         └────────────────────────────────> ┘        │
//!                                                     └──> master gain ──> out ──> capture
//! ```
//!
//! The graph renders in fixed quanta of [`RENDER_QUANTUM`] frames so the
//! scratch buffers are allocated once.

use crate::channel::SignalChannel;
use crate::clock::FrameClock;
use crate::effects::EffectsChain;
use crate::mixer::Mixer;
use crate::recorder::CaptureTap;
use crate::state::Deck;
use crate::synth::VoiceEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use twindeck_analysis::MeterTap;

/// Frames rendered per internal block
pub const RENDER_QUANTUM: usize = 128;

const QUANTUM_SAMPLES: usize = RENDER_QUANTUM * 2;

/// Where the synthesizer output is summed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthRoute {
    /// Into deck A's gain stage
    DeckA,
    /// Into deck B's gain stage
    DeckB,
    /// Straight into the pre-master bus, bypassing the crossfader
    Master,
}

impl SynthRoute {
    fn deck(self) -> Option<Deck> {
        match self {
            SynthRoute::DeckA => Some(Deck::A),
            SynthRoute::DeckB => Some(Deck::B),
            SynthRoute::Master => None,
        }
    }
}

/// Graph locked by the device callback with `try_lock`
pub type SharedGraph = Arc<Mutex<AudioGraph>>;

/// The complete signal graph
pub struct AudioGraph {
    sample_rate: u32,
    channels: [SignalChannel; 2],
    synth: VoiceEngine,
    synth_route: Option<SynthRoute>,
    effects: EffectsChain,
    effects_insert: Option<Deck>,
    mixer: Mixer,
    master_meter: MeterTap,
    capture: Option<CaptureTap>,
    clock: FrameClock,

    deck_bufs: [Vec<f32>; 2],
    synth_buf: Vec<f32>,
    /// Stereo scratch for non-stereo device layouts
    device_buf: Vec<f32>,
}

impl AudioGraph {
    pub fn new(sample_rate: u32, smoothing_secs: f32, voice_settle_secs: f32) -> Self {
        Self {
            sample_rate,
            channels: [
                SignalChannel::new(sample_rate, smoothing_secs),
                SignalChannel::new(sample_rate, smoothing_secs),
            ],
            synth: VoiceEngine::new(sample_rate, voice_settle_secs),
            synth_route: None,
            effects: EffectsChain::new(sample_rate),
            effects_insert: None,
            mixer: Mixer::new(sample_rate, smoothing_secs),
            master_meter: MeterTap::default(),
            capture: None,
            clock: FrameClock::new(sample_rate),
            deck_bufs: [vec![0.0; QUANTUM_SAMPLES], vec![0.0; QUANTUM_SAMPLES]],
            synth_buf: vec![0.0; QUANTUM_SAMPLES],
            device_buf: vec![0.0; QUANTUM_SAMPLES],
        }
    }

    /// Wrap in the shared handle used by the device
    pub fn into_shared(self) -> SharedGraph {
        Arc::new(Mutex::new(self))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Clock advanced by every rendered frame
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn channel(&self, deck: Deck) -> &SignalChannel {
        &self.channels[deck.index()]
    }

    pub fn channel_mut(&mut self, deck: Deck) -> &mut SignalChannel {
        &mut self.channels[deck.index()]
    }

    pub fn synth(&self) -> &VoiceEngine {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut VoiceEngine {
        &mut self.synth
    }

    pub fn synth_route(&self) -> Option<SynthRoute> {
        self.synth_route
    }

    /// Route the synth output; `None` disconnects it
    pub fn set_synth_route(&mut self, route: Option<SynthRoute>) {
        self.synth_route = route;
    }

    pub fn effects(&self) -> &EffectsChain {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectsChain {
        &mut self.effects
    }

    pub fn effects_insert(&self) -> Option<Deck> {
        self.effects_insert
    }

    /// Insert the effects chain after `deck`, or remove it
    pub fn set_effects_insert(&mut self, deck: Option<Deck>) {
        if deck != self.effects_insert {
            self.effects.reset();
        }
        self.effects_insert = deck;
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    /// Copy the recent pre-master bus (mono, oldest first) for level analysis
    pub fn copy_master_window(&self, out: &mut Vec<f32>) {
        self.master_meter.copy_window(out);
    }

    /// Start feeding master output into `tap`
    pub fn install_capture(&mut self, tap: CaptureTap) {
        self.capture = Some(tap);
    }

    /// Disconnect the capture tap
    pub fn remove_capture(&mut self) -> Option<CaptureTap> {
        self.capture.take()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    /// Stop every source and voice and disconnect the capture tap
    pub fn silence(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.reset();
        }
        self.synth.panic();
        self.effects.reset();
        self.capture = None;
    }

    /// Render stereo interleaved samples into `out` (overwritten)
    pub fn render(&mut self, out: &mut [f32]) {
        for block in out.chunks_mut(QUANTUM_SAMPLES) {
            self.render_quantum(block);
        }
    }

    /// Render into a device buffer with `channels` interleaved channels
    ///
    /// Mono devices get the L/R average; channels past the second are silent.
    /// A trailing partial frame is zeroed.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let whole = out.len() - out.len() % channels.max(1);
        let (out, partial) = out.split_at_mut(whole);
        partial.fill(0.0);

        match channels {
            0 => out.fill(0.0),
            2 => self.render(out),
            _ => {
                let mut device_buf = std::mem::take(&mut self.device_buf);
                for block in out.chunks_mut(RENDER_QUANTUM * channels) {
                    let frames = block.len() / channels;
                    let stereo = &mut device_buf[..frames * 2];
                    self.render_quantum(stereo);

                    for (frame, src) in block.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                        if channels == 1 {
                            frame[0] = (src[0] + src[1]) * 0.5;
                        } else {
                            frame[0] = src[0];
                            frame[1] = src[1];
                            frame[2..].fill(0.0);
                        }
                    }
                }
                self.device_buf = device_buf;
            }
        }
    }

    /// One block of at most [`RENDER_QUANTUM`] frames
    fn render_quantum(&mut self, out: &mut [f32]) {
        let len = out.len() - out.len() % 2;
        out[len..].fill(0.0);
        let out = &mut out[..len];
        let frames = len / 2;

        // Voices keep their lifecycle even while unrouted
        let synth = &mut self.synth_buf[..len];
        self.synth.render(synth);
        let synth_deck = self.synth_route.and_then(SynthRoute::deck);

        for deck in Deck::ALL {
            let buf = &mut self.deck_bufs[deck.index()][..len];
            let external = (synth_deck == Some(deck)).then_some(&*synth);
            self.channels[deck.index()].process(buf, external);

            if self.effects_insert == Some(deck) {
                self.effects.process(buf);
            }
        }

        let direct = (self.synth_route == Some(SynthRoute::Master)).then_some(&*synth);
        let [deck_a, deck_b] = &self.deck_bufs;
        self.mixer.sum(&deck_a[..len], &deck_b[..len], direct, out);

        self.master_meter.push_interleaved(out);
        self.mixer.apply_master(out);

        if let Some(tap) = self.capture.as_mut() {
            tap.push(out);
        }

        self.clock.advance(frames as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::AudioClock;
    use crate::source::AudioBuffer;
    use crate::state::DeckChannelState;

    fn tone(secs: f64, sample_rate: u32) -> Arc<AudioBuffer> {
        let frames = (secs * sample_rate as f64) as usize;
        let mono: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / sample_rate as f32).sin() * 0.5)
            .collect();
        Arc::new(AudioBuffer::from_mono(&mono, sample_rate))
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn test_silent_graph_renders_zeros_and_advances_clock() {
        let mut graph = AudioGraph::new(48000, 0.005, 0.05);
        let mut out = vec![1.0; 1000];
        graph.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.clock().frames(), 500);
    }

    #[test]
    fn test_crossfader_isolates_deck() {
        let sr = 48000;
        let mut graph = AudioGraph::new(sr, 0.001, 0.05);
        graph.channel_mut(Deck::A).connect_playback_source(tone(1.0, sr));
        graph.channel_mut(Deck::A).start_source(0.0).unwrap();

        graph.mixer_mut().set_crossfader(1.0);
        let mut out = vec![0.0; 9600];
        graph.render(&mut out);
        graph.render(&mut out);
        assert!(peak(&out) < 1e-4, "deck A leaked: {}", peak(&out));

        graph.mixer_mut().set_crossfader(0.0);
        graph.render(&mut out);
        graph.render(&mut out);
        assert!(peak(&out) > 0.3);
    }

    #[test]
    fn test_synth_routed_to_master_bypasses_crossfader() {
        let mut graph = AudioGraph::new(48000, 0.001, 0.05);
        graph.mixer_mut().set_crossfader(1.0);
        graph.set_synth_route(Some(SynthRoute::Master));
        graph.synth_mut().note_on(60, 1.0);

        let mut out = vec![0.0; 9600];
        graph.render(&mut out);
        assert!(peak(&out) > 0.01);
    }

    #[test]
    fn test_unrouted_synth_is_silent() {
        let mut graph = AudioGraph::new(48000, 0.001, 0.05);
        graph.synth_mut().note_on(60, 1.0);
        let mut out = vec![0.0; 4800];
        graph.render(&mut out);
        assert_eq!(peak(&out), 0.0);
        assert!(graph.synth().active_voice().is_some());
    }

    #[test]
    fn test_synth_through_deck_follows_deck_gain() {
        let mut graph = AudioGraph::new(48000, 0.001, 0.05);
        graph.set_synth_route(Some(SynthRoute::DeckB));
        graph.mixer_mut().set_crossfader(1.0);
        let mut state = DeckChannelState::default();
        state.gain = 0.0;
        graph.channel_mut(Deck::B).apply_parameters(&state);
        graph.synth_mut().note_on(60, 1.0);

        let mut out = vec![0.0; 9600];
        graph.render(&mut out);
        graph.render(&mut out);
        assert!(peak(&out) < 1e-3);
    }

    #[test]
    fn test_mono_and_multichannel_layouts() {
        let sr = 48000;
        let mut graph = AudioGraph::new(sr, 0.001, 0.05);
        graph.channel_mut(Deck::A).connect_playback_source(tone(1.0, sr));
        graph.channel_mut(Deck::A).start_source(0.0).unwrap();
        graph.mixer_mut().set_crossfader(0.0);

        let mut mono = vec![0.0; 1000];
        graph.render_interleaved(&mut mono, 1);
        assert!(peak(&mono) > 0.0);

        let mut quad = vec![1.0; 1200];
        graph.render_interleaved(&mut quad, 4);
        assert!(quad.chunks_exact(4).all(|f| f[2] == 0.0 && f[3] == 0.0));
        assert!(quad.chunks_exact(4).any(|f| f[0] != 0.0));
        assert_eq!(graph.clock().frames(), 1000 + 300);
    }

    #[test]
    fn test_partial_trailing_frame_is_zeroed() {
        let sr = 48000;
        let mut graph = AudioGraph::new(sr, 0.001, 0.05);
        graph.channel_mut(Deck::A).connect_playback_source(tone(1.0, sr));
        graph.channel_mut(Deck::A).start_source(0.0).unwrap();
        graph.mixer_mut().set_crossfader(0.0);
        let mut warm = vec![0.0; 9600];
        graph.render(&mut warm);

        let mut quad = vec![7.0; 4 * 100 + 3];
        graph.render_interleaved(&mut quad, 4);
        assert_eq!(&quad[400..], &[0.0, 0.0, 0.0]);
        assert!(quad[..400].iter().any(|&s| s != 0.0));

        let mut stereo = vec![7.0; 257];
        graph.render_interleaved(&mut stereo, 2);
        assert_eq!(stereo[256], 0.0);
        assert_eq!(graph.clock().frames(), 4800 + 100 + 128);
    }

    #[test]
    fn test_master_meter_sees_pre_master_signal() {
        let sr = 48000;
        let mut graph = AudioGraph::new(sr, 0.001, 0.05);
        graph.channel_mut(Deck::A).connect_playback_source(tone(1.0, sr));
        graph.channel_mut(Deck::A).start_source(0.0).unwrap();
        graph.mixer_mut().set_crossfader(0.0);
        graph.mixer_mut().set_master_volume(0.0);

        let mut out = vec![0.0; 9600];
        graph.render(&mut out);

        let mut window = Vec::new();
        graph.copy_master_window(&mut window);
        assert!(window.iter().any(|&s| s.abs() > 0.1));
    }

    #[test]
    fn test_effects_insert_only_touches_one_deck() {
        let mut graph = AudioGraph::new(48000, 0.001, 0.05);
        graph.set_effects_insert(Some(Deck::B));
        assert_eq!(graph.effects_insert(), Some(Deck::B));
        graph.set_effects_insert(None);
        assert_eq!(graph.effects_insert(), None);
    }

    #[test]
    fn test_silence_drops_sources_and_voices() {
        let sr = 48000;
        let mut graph = AudioGraph::new(sr, 0.001, 0.05);
        graph.channel_mut(Deck::A).connect_playback_source(tone(1.0, sr));
        graph.synth_mut().note_on(64, 1.0);
        graph.silence();
        assert!(graph.channel(Deck::A).source_handle().is_none());
        assert!(graph.synth().is_silent());
        assert!(!graph.is_capturing());
        assert!(graph.clock().now() == 0.0);
    }
}
