//! TwinDeck - headless host for the mixing core
//!
//! Runs a short scripted session: two generated tracks crossfade, the
//! synth plays a phrase through deck B, and the master bus is recorded
//! and exported.

use std::f32::consts::PI;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use twindeck_audio::{
    AudioBuffer, Deck, DeckChannelState, DeviceStatus, EffectsSettings, EngineConfig, EqBand,
    MixCoordinator, MixSnapshot, MixerEvent, RecordingState, StateSource, SynthRoute,
    SynthSettings, Waveform,
};

/// Length of the scripted session in seconds
const SESSION_SECS: f64 = 16.0;
/// Crossfade from deck A to deck B
const CROSSFADE_START: f64 = 4.0;
const CROSSFADE_END: f64 = 8.0;

/// Application-side state; the coordinator only reads it
struct DemoApp {
    mix: MixSnapshot,
    master_level: f32,
    recording: Option<RecordingState>,
    device: Option<DeviceStatus>,
}

impl StateSource for DemoApp {
    fn snapshot(&self) -> MixSnapshot {
        self.mix.clone()
    }
}

impl DemoApp {
    fn new(track_a: Arc<AudioBuffer>, track_b: Arc<AudioBuffer>) -> Self {
        let mut mix = MixSnapshot {
            deck_a: DeckChannelState::default().with_buffer(track_a),
            deck_b: DeckChannelState::default().with_buffer(track_b),
            crossfader: 0.0,
            master_volume: 0.9,
        };
        mix.deck_b.eq_low_db = -48.0;
        Self {
            mix,
            master_level: 0.0,
            recording: None,
            device: None,
        }
    }

    /// Fold telemetry back into the application state
    fn apply_events(&mut self, events: &Receiver<MixerEvent>) {
        for event in events.try_iter() {
            match event {
                MixerEvent::PositionChanged { deck, position } => {
                    self.mix.deck_mut(deck).position = position;
                }
                MixerEvent::LevelChanged { deck, level } => {
                    self.mix.deck_mut(deck).level = level;
                }
                MixerEvent::MasterLevelChanged { level } => self.master_level = level,
                MixerEvent::TransportStopped { deck, position } => {
                    let state = self.mix.deck_mut(deck);
                    state.playing = false;
                    state.position = position;
                    info!("Deck {} stopped at {:.2}s", deck.label(), position);
                }
                MixerEvent::RecordingStateChanged(state) => self.recording = Some(state),
                MixerEvent::DeviceStateChanged(status) => {
                    info!("Device {:?}", status);
                    self.device = Some(status);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Play(Deck),
    StartRecording,
    RouteSynth,
    BassSwap,
    EnableEffects,
    NoteOn(u8),
    NoteOff(u8),
    StopRecording,
}

const CUES: &[(f64, Action)] = &[
    (0.0, Action::Play(Deck::A)),
    (0.0, Action::StartRecording),
    (3.5, Action::Play(Deck::B)),
    (6.0, Action::BassSwap),
    (8.0, Action::RouteSynth),
    (8.0, Action::EnableEffects),
    (9.0, Action::NoteOn(57)),
    (9.5, Action::NoteOn(60)),
    (10.0, Action::NoteOn(64)),
    (10.5, Action::NoteOff(64)),
    (11.0, Action::NoteOn(69)),
    (12.5, Action::NoteOff(69)),
    (15.0, Action::StopRecording),
];

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = EngineConfig::load();
    let (event_tx, event_rx) = MixCoordinator::event_channel();
    let mut coordinator = MixCoordinator::new(&config, event_tx);
    coordinator.resume_device();

    let sample_rate = coordinator.sample_rate();
    let track_a = Arc::new(demo_track(sample_rate, 12.0, 110.0, 124.0));
    let track_b = Arc::new(demo_track(sample_rate, 14.0, 146.83, 124.0));
    let mut app = DemoApp::new(track_a, track_b);

    let frame_interval = config.frame_interval();
    let started = Instant::now();
    let mut next_cue = 0;
    let mut last_report = 0.0;

    while coordinator.frame(&app) {
        app.apply_events(&event_rx);

        let elapsed = started.elapsed().as_secs_f64();
        app.mix.crossfader = crossfade_at(elapsed);

        while let Some(&(at, action)) = CUES.get(next_cue) {
            if at > elapsed {
                break;
            }
            if let Err(e) = perform(&mut coordinator, &mut app, action) {
                warn!("{:?} failed: {}", action, e);
            }
            next_cue += 1;
        }

        if elapsed - last_report >= 1.0 {
            last_report = elapsed;
            report(&coordinator, &app);
        }

        if elapsed >= SESSION_SECS {
            break;
        }
        thread::sleep(frame_interval);
    }

    coordinator.shutdown();
    app.apply_events(&event_rx);
    info!("Session finished");
    Ok(())
}

fn perform(coordinator: &mut MixCoordinator, app: &mut DemoApp, action: Action) -> anyhow::Result<()> {
    match action {
        Action::Play(deck) => app.mix.deck_mut(deck).playing = true,
        Action::StartRecording => coordinator.start_recording()?,
        Action::BassSwap => {
            app.mix.deck_a.toggle_kill(EqBand::Low);
            app.mix.deck_b.toggle_kill(EqBand::Low);
        }
        Action::RouteSynth => {
            let mut settings = SynthSettings::default();
            settings.osc2.waveform = Waveform::Square;
            settings.osc2.octave = -1;
            settings.osc2.fine = 0.07;
            settings.filter_cutoff = 900.0;
            settings.filter_env_amount = 2500.0;
            coordinator.set_synth_settings(settings)?;
            coordinator.connect_synth(Some(SynthRoute::DeckB))?;
        }
        Action::EnableEffects => {
            let mut effects = EffectsSettings::default();
            effects.chorus.enabled = true;
            effects.delay.enabled = true;
            effects.delay.time = 60.0 / 124.0 * 0.75;
            effects.reverb.enabled = true;
            effects.reverb.decay = 1.8;
            coordinator.update_effects(&effects)?;
            coordinator.set_effects_insert(Some(Deck::B))?;
        }
        Action::NoteOn(note) => coordinator.note_on(note, 0.8)?,
        Action::NoteOff(note) => coordinator.note_off(note)?,
        Action::StopRecording => {
            let state = coordinator.stop_recording()?;
            info!("Recorded {:.1}s", state.duration.as_secs_f64());
            let path = coordinator.export_recording("twindeck-session")?;
            info!("Exported {}", path.display());
        }
    }
    Ok(())
}

fn crossfade_at(elapsed: f64) -> f32 {
    let t = (elapsed - CROSSFADE_START) / (CROSSFADE_END - CROSSFADE_START);
    t.clamp(0.0, 1.0) as f32
}

fn report(coordinator: &MixCoordinator, app: &DemoApp) {
    let diagnostics = coordinator.diagnostics();
    info!(
        "A {:5.2}s lvl {:.2} | B {:5.2}s lvl {:.2} | xf {:.2} | master {:.2} | drift {} | rec {} | {:?}",
        app.mix.deck_a.position,
        app.mix.deck_a.level,
        app.mix.deck_b.position,
        app.mix.deck_b.level,
        app.mix.crossfader,
        app.master_level,
        diagnostics
            .drift_ms
            .map_or_else(|| "-".to_string(), |d| format!("{:.1}ms", d)),
        app.recording
            .filter(|r| r.is_recording)
            .map_or_else(|| "off".to_string(), |r| format!("{:.1}s", r.duration.as_secs_f64())),
        app.device,
    );
}

/// Four-on-the-floor pulse over a sustained fifth
fn demo_track(sample_rate: u32, secs: f64, root_hz: f32, bpm: f32) -> AudioBuffer {
    let sr = sample_rate as f32;
    let frames = (secs * sample_rate as f64) as usize;
    let beat = 60.0 / bpm;

    let samples: Vec<f32> = (0..frames)
        .map(|i| {
            let t = i as f32 / sr;
            let since_beat = t % beat;
            let kick_freq = 50.0 + 90.0 * (-since_beat * 30.0).exp();
            let kick = (2.0 * PI * kick_freq * since_beat).sin() * (-since_beat * 8.0).exp();
            let pad = (2.0 * PI * root_hz * t).sin() + 0.6 * (2.0 * PI * root_hz * 1.5 * t).sin();
            0.5 * kick + 0.15 * pad
        })
        .collect();

    AudioBuffer::from_mono(&samples, sample_rate)
}
