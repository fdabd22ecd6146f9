//! Graph coordinator and the per-frame reconciliation loop
//!
//! The application owns the mix state. Once per display frame the host
//! calls [`MixCoordinator::frame`], which reads a [`MixSnapshot`], pushes
//! parameter and transport changes into the graph and reports position,
//! level and transport telemetry back as [`MixerEvent`]s. Nothing here
//! writes to the application state directly.

use crate::channel::SignalChannel;
use crate::clock::AudioClock;
use crate::config::EngineConfig;
use crate::device::{DeviceStatus, DeviceTarget, OutputDevice};
use crate::effects::{prepare_reverb_kernel, EffectsSettings, ImpulseCache};
use crate::error::{EngineError, EngineResult, SourceError};
use crate::graph::{AudioGraph, SharedGraph, SynthRoute};
use crate::recorder::{Recorder, RecordingState};
use crate::source::AudioBuffer;
use crate::state::{Deck, DeckChannelState, MixSnapshot, SourceKind, StateSource};
use crate::synth::SynthSettings;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use twindeck_analysis::LevelMeter;

/// Capacity of the telemetry queue
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Rate differences below this do not re-anchor the transport
const RATE_EPSILON: f64 = 1.0e-6;

/// Meter slot of the master bus, after the two decks
const MASTER_METER: usize = 2;

/// Telemetry sent from the coordinator to the application
#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    PositionChanged { deck: Deck, position: f64 },
    LevelChanged { deck: Deck, level: f32 },
    MasterLevelChanged { level: f32 },
    /// The deck reached the end of its buffer
    TransportStopped { deck: Deck, position: f64 },
    RecordingStateChanged(RecordingState),
    DeviceStateChanged(DeviceStatus),
}

/// Absolute difference of two anchors in milliseconds
pub fn drift_ms(anchor_a: f64, anchor_b: f64) -> f64 {
    (anchor_a - anchor_b).abs() * 1000.0
}

/// Per-deck diagnostic view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDiagnostics {
    pub is_playing: bool,
    pub source_kind: SourceKind,
    /// Clock time at which the buffer would have started at the current rate
    pub anchor: Option<f64>,
    pub position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostics {
    pub deck_a: ChannelDiagnostics,
    pub deck_b: ChannelDiagnostics,
    /// Anchor distance between the decks, when both are playing
    pub drift_ms: Option<f64>,
    pub device: DeviceStatus,
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    position: f64,
    level: f32,
}

/// Coordinator-side transport bookkeeping for one deck
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    was_playing: bool,
    anchor: Option<f64>,
    /// Rate the anchor was computed with
    rate: f64,
    /// Last emitted position
    position: f64,
    /// Last emitted level
    level: f32,
    /// End-of-track latch
    ended: bool,
    duration: f64,
    source_kind: SourceKind,
    /// Buffer reference seen in the previous snapshot
    seen_buffer: Option<Arc<AudioBuffer>>,
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self {
            was_playing: false,
            anchor: None,
            rate: 1.0,
            position: 0.0,
            level: 0.0,
            ended: false,
            duration: 0.0,
            source_kind: SourceKind::LocalBuffer,
            seen_buffer: None,
        }
    }
}

impl ChannelTransport {
    pub fn is_playing(&self) -> bool {
        self.was_playing
    }

    pub fn anchor(&self) -> Option<f64> {
        self.anchor
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Position implied by the anchor at `now`
    pub fn position_at(&self, now: f64) -> Option<f64> {
        self.anchor.map(|anchor| (now - anchor) * self.rate)
    }

    fn diagnostics(&self) -> ChannelDiagnostics {
        ChannelDiagnostics {
            is_playing: self.was_playing,
            source_kind: self.source_kind,
            anchor: self.anchor,
            position: self.position,
        }
    }

    fn reconcile(
        &mut self,
        graph: &mut AudioGraph,
        deck: Deck,
        state: &DeckChannelState,
        now: f64,
        thresholds: Thresholds,
        events: &mut Vec<MixerEvent>,
    ) -> Result<(), SourceError> {
        if !same_buffer(&self.seen_buffer, &state.buffer) {
            self.seen_buffer = state.buffer.clone();
            let channel = graph.channel_mut(deck);
            match &state.buffer {
                Some(buffer) => self.load(channel, deck, Arc::clone(buffer), events),
                None => self.unload(channel, deck, events),
            }
        }

        let channel = graph.channel_mut(deck);
        self.duration = if state.duration > 0.0 {
            state.duration
        } else {
            channel.buffer().map_or(0.0, |b| b.duration())
        };
        self.source_kind = state.source_kind;

        if state.source_kind == SourceKind::LocalBuffer {
            if state.playing && !self.was_playing {
                self.start(channel, deck, now, state.effective_rate() as f64)?;
            } else if !state.playing && self.was_playing {
                self.halt(channel, deck, now, events);
            }
        } else if self.was_playing {
            // An external source took over playback
            self.halt(channel, deck, now, events);
        }

        channel.apply_parameters(state);

        if let Some(anchor) = self.anchor {
            let rate = state.effective_rate() as f64;
            if (rate - self.rate).abs() > RATE_EPSILON {
                let position = (now - anchor) * self.rate;
                self.anchor = Some(now - position / rate);
                self.rate = rate;
            }
        }

        if let (Some(position), false) = (self.position_at(now), self.ended) {
            if position >= self.duration {
                self.ended = true;
                if self.position != self.duration {
                    self.position = self.duration;
                    events.push(MixerEvent::PositionChanged {
                        deck,
                        position: self.duration,
                    });
                }
                events.push(MixerEvent::TransportStopped {
                    deck,
                    position: self.duration,
                });
                info!("Deck {} reached end at {:.3}s", deck.label(), self.duration);
                if let Err(e) = channel.stop_source() {
                    debug!("Deck {} stop at end: {}", deck.label(), e);
                }
            } else if (position - self.position).abs() > thresholds.position {
                self.position = position;
                events.push(MixerEvent::PositionChanged { deck, position });
            }
        }

        Ok(())
    }

    /// Emit a level event when `level` moved past the threshold
    fn report_level(&mut self, deck: Deck, level: f32, threshold: f32, events: &mut Vec<MixerEvent>) {
        if (level - self.level).abs() > threshold {
            self.level = level;
            events.push(MixerEvent::LevelChanged { deck, level });
        }
    }

    fn start(
        &mut self,
        channel: &mut SignalChannel,
        deck: Deck,
        now: f64,
        rate: f64,
    ) -> Result<(), SourceError> {
        self.was_playing = true;
        self.ended = false;

        let offset = self.position.clamp(0.0, self.duration.max(0.0));
        match channel.play_from(offset) {
            Ok(handle) => {
                self.rate = rate;
                self.anchor = Some(now - offset / rate);
                debug!(
                    "Deck {} source {} playing from {:.3}s",
                    deck.label(),
                    handle.id(),
                    offset
                );
                Ok(())
            }
            Err(SourceError::NoSource) => {
                debug!("Deck {} has no buffer to play", deck.label());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn halt(&mut self, channel: &mut SignalChannel, deck: Deck, now: f64, events: &mut Vec<MixerEvent>) {
        self.was_playing = false;

        if let Some(position) = self.position_at(now) {
            let position = position.clamp(0.0, self.duration.max(0.0));
            if position != self.position {
                self.position = position;
                events.push(MixerEvent::PositionChanged { deck, position });
            }
        }
        self.anchor = None;

        if let Err(e) = channel.stop_source() {
            debug!("Deck {} stop: {}", deck.label(), e);
        }
    }

    fn load(
        &mut self,
        channel: &mut SignalChannel,
        deck: Deck,
        buffer: Arc<AudioBuffer>,
        events: &mut Vec<MixerEvent>,
    ) {
        let duration = buffer.duration();
        let handle = channel.connect_playback_source(buffer);
        self.reset(duration);
        events.push(MixerEvent::PositionChanged { deck, position: 0.0 });
        info!(
            "Deck {} loaded {:.2}s buffer (source {})",
            deck.label(),
            duration,
            handle.id()
        );
    }

    fn unload(&mut self, channel: &mut SignalChannel, deck: Deck, events: &mut Vec<MixerEvent>) {
        channel.disconnect_source();
        self.reset(0.0);
        events.push(MixerEvent::PositionChanged { deck, position: 0.0 });
        debug!("Deck {} unloaded", deck.label());
    }

    fn reset(&mut self, duration: f64) {
        self.was_playing = false;
        self.anchor = None;
        self.position = 0.0;
        self.ended = false;
        self.duration = duration;
    }

    fn seek(
        &mut self,
        channel: &mut SignalChannel,
        deck: Deck,
        seconds: f64,
        now: f64,
        events: &mut Vec<MixerEvent>,
    ) -> Result<f64, SourceError> {
        let requested = if seconds.is_finite() { seconds } else { 0.0 };
        let position = requested.clamp(0.0, self.duration.max(0.0));
        if position != seconds {
            debug!(
                "Seek on deck {} clamped from {:.3}s to {:.3}s",
                deck.label(),
                seconds,
                position
            );
        }

        self.position = position;
        self.ended = false;
        events.push(MixerEvent::PositionChanged { deck, position });

        if self.anchor.is_some() {
            channel.play_from(position)?;
            self.anchor = Some(now - position / self.rate);
        }
        Ok(position)
    }
}

fn same_buffer(a: &Option<Arc<AudioBuffer>>, b: &Option<Arc<AudioBuffer>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Owner of the graph, device, recorder and reconciliation loop
pub struct MixCoordinator {
    graph: SharedGraph,
    clock: Arc<dyn AudioClock>,
    device: OutputDevice,
    recorder: Recorder,
    impulses: ImpulseCache,
    transports: [ChannelTransport; 2],
    /// Deck A, deck B and master analysers; run outside the graph lock
    meters: [LevelMeter; 3],
    meter_windows: [Vec<f32>; 3],
    master_level: f32,
    thresholds: Thresholds,
    events: Sender<MixerEvent>,
    shut_down: bool,
}

impl MixCoordinator {
    /// Create the telemetry channel pair
    pub fn event_channel() -> (Sender<MixerEvent>, Receiver<MixerEvent>) {
        bounded(EVENT_QUEUE_CAPACITY)
    }

    /// Build a coordinator on the best available output device.
    ///
    /// The device starts suspended; call [`MixCoordinator::resume_device`].
    pub fn new(config: &EngineConfig, events: Sender<MixerEvent>) -> Self {
        let target = DeviceTarget::acquire(config.sample_rate);
        let graph = Self::build_graph(config, target.sample_rate());
        let clock: Arc<dyn AudioClock> = Arc::new(graph.lock().clock().clone());
        let device = OutputDevice::open(target, graph.clone());
        Self::assemble(config, graph, clock, device, events)
    }

    /// Build a coordinator with no output device. The caller renders the
    /// graph through [`MixCoordinator::render`] and drives `clock`.
    pub fn offline(config: &EngineConfig, clock: Arc<dyn AudioClock>, events: Sender<MixerEvent>) -> Self {
        let graph = Self::build_graph(config, config.sample_rate);
        let device = OutputDevice::detached(config.sample_rate);
        Self::assemble(config, graph, clock, device, events)
    }

    fn build_graph(config: &EngineConfig, sample_rate: u32) -> SharedGraph {
        AudioGraph::new(sample_rate, config.smoothing_secs(), config.voice_settle_secs()).into_shared()
    }

    fn assemble(
        config: &EngineConfig,
        graph: SharedGraph,
        clock: Arc<dyn AudioClock>,
        device: OutputDevice,
        events: Sender<MixerEvent>,
    ) -> Self {
        let sample_rate = device.sample_rate();
        info!("Coordinator ready on {} at {} Hz", device.name(), sample_rate);

        Self {
            graph,
            clock,
            recorder: Recorder::new(
                sample_rate,
                config.recording_encodings.clone(),
                config.recording_dir.clone(),
                config.capture_tick(),
            ),
            device,
            impulses: ImpulseCache::new(sample_rate),
            transports: Default::default(),
            meters: std::array::from_fn(|_| LevelMeter::default()),
            meter_windows: Default::default(),
            master_level: 0.0,
            thresholds: Thresholds {
                position: config.position_epsilon_secs(),
                level: config.level_epsilon,
            },
            events,
            shut_down: false,
        }
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn sample_rate(&self) -> u32 {
        self.device.sample_rate()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn transport(&self, deck: Deck) -> &ChannelTransport {
        &self.transports[deck.index()]
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.shut_down {
            Err(EngineError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: MixerEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => debug!("Event queue full, dropping {:?}", event),
        }
    }

    fn emit_all(&self, events: Vec<MixerEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// One reconciliation pass. Returns `false` once shut down so the host
    /// stops scheduling frames. Failures are logged and never end the loop.
    pub fn frame(&mut self, source: &dyn StateSource) -> bool {
        if self.shut_down {
            return false;
        }
        let snapshot = source.snapshot();
        if let Err(e) = self.tick(&snapshot) {
            warn!("Reconciliation tick failed: {}", e);
        }
        true
    }

    /// Reconcile the graph with `snapshot` and emit telemetry
    pub fn tick(&mut self, snapshot: &MixSnapshot) -> EngineResult<()> {
        self.ensure_running()?;

        let now = self.clock.now();
        let mut events = Vec::new();
        let mut first_err = None;

        {
            let mut graph = self.graph.lock();
            for deck in Deck::ALL {
                let transport = &mut self.transports[deck.index()];
                let state = snapshot.deck(deck);
                if let Err(e) = transport.reconcile(&mut graph, deck, state, now, self.thresholds, &mut events) {
                    warn!("Deck {} reconcile failed: {}", deck.label(), e);
                    first_err.get_or_insert(EngineError::from(e));
                }
                graph
                    .channel(deck)
                    .copy_meter_window(&mut self.meter_windows[deck.index()]);
            }

            let mixer = graph.mixer_mut();
            mixer.set_crossfader(snapshot.crossfader);
            mixer.set_master_volume(snapshot.master_volume);
            graph.copy_master_window(&mut self.meter_windows[MASTER_METER]);
        }

        // FFT analysis runs with the graph unlocked
        for deck in Deck::ALL {
            let i = deck.index();
            let level = self.meters[i].level_of(&self.meter_windows[i]);
            self.transports[i].report_level(deck, level, self.thresholds.level, &mut events);
        }
        let level = self.meters[MASTER_METER].level_of(&self.meter_windows[MASTER_METER]);
        if (level - self.master_level).abs() > self.thresholds.level {
            self.master_level = level;
            events.push(MixerEvent::MasterLevelChanged { level });
        }

        if let Some(state) = self.recorder.poll() {
            events.push(MixerEvent::RecordingStateChanged(state));
        }

        self.emit_all(events);
        first_err.map_or(Ok(()), Err)
    }

    /// Replace the deck's source with a fresh one for `buffer`
    pub fn load_buffer(&mut self, deck: Deck, buffer: Arc<AudioBuffer>) -> EngineResult<()> {
        self.ensure_running()?;
        let mut events = Vec::new();
        {
            let mut graph = self.graph.lock();
            self.transports[deck.index()].load(graph.channel_mut(deck), deck, buffer, &mut events);
        }
        self.emit_all(events);
        Ok(())
    }

    /// Move the deck to `seconds` (clamped into the track). Returns the
    /// position actually used.
    pub fn seek(&mut self, deck: Deck, seconds: f64) -> EngineResult<f64> {
        self.ensure_running()?;
        let now = self.clock.now();
        let mut events = Vec::new();
        let position = {
            let mut graph = self.graph.lock();
            self.transports[deck.index()].seek(graph.channel_mut(deck), deck, seconds, now, &mut events)?
        };
        self.emit_all(events);
        Ok(position)
    }

    /// Route the synth into a deck, the master bus, or nowhere
    pub fn connect_synth(&mut self, route: Option<SynthRoute>) -> EngineResult<()> {
        self.ensure_running()?;
        self.graph.lock().set_synth_route(route);
        debug!("Synth routed to {:?}", route);
        Ok(())
    }

    pub fn note_on(&mut self, note: u8, velocity: f32) -> EngineResult<()> {
        self.ensure_running()?;
        self.graph.lock().synth_mut().note_on(note, velocity);
        Ok(())
    }

    pub fn note_off(&mut self, note: u8) -> EngineResult<()> {
        self.ensure_running()?;
        self.graph.lock().synth_mut().note_off(note);
        Ok(())
    }

    pub fn all_notes_off(&mut self) -> EngineResult<()> {
        self.ensure_running()?;
        self.graph.lock().synth_mut().all_notes_off();
        Ok(())
    }

    pub fn set_synth_settings(&mut self, settings: SynthSettings) -> EngineResult<()> {
        self.ensure_running()?;
        self.graph.lock().synth_mut().set_settings(settings);
        Ok(())
    }

    /// Insert the effects chain after `deck`, or bypass it with `None`
    pub fn set_effects_insert(&mut self, deck: Option<Deck>) -> EngineResult<()> {
        self.ensure_running()?;
        self.graph.lock().set_effects_insert(deck);
        Ok(())
    }

    /// Apply effects settings. A new reverb impulse is generated and
    /// prepared before the graph lock is taken.
    pub fn update_effects(&mut self, settings: &EffectsSettings) -> EngineResult<()> {
        self.ensure_running()?;

        let installed = self.graph.lock().effects().has_reverb_kernel();
        let kernel = prepare_reverb_kernel(settings, &mut self.impulses, installed);

        let replaced = self.graph.lock().effects_mut().update(settings, kernel);
        // Old kernel is freed outside the lock
        drop(replaced);
        Ok(())
    }

    /// Begin capturing the master bus
    pub fn start_recording(&mut self) -> EngineResult<()> {
        self.ensure_running()?;
        let tap = self.recorder.start()?;
        self.graph.lock().install_capture(tap);
        info!("Recording started");
        self.emit(MixerEvent::RecordingStateChanged(self.recorder.state()));
        Ok(())
    }

    /// Finish the capture session and keep the artifact for export
    pub fn stop_recording(&mut self) -> EngineResult<RecordingState> {
        self.ensure_running()?;
        self.graph.lock().remove_capture();
        let duration = self.recorder.stop()?.duration();
        info!("Recording stopped after {:.1}s", duration.as_secs_f64());
        let state = self.recorder.state();
        self.emit(MixerEvent::RecordingStateChanged(state));
        Ok(state)
    }

    /// Write the finished recording as `filename` in the recordings directory
    pub fn export_recording(&self, filename: &str) -> EngineResult<PathBuf> {
        Ok(self.recorder.export(filename)?)
    }

    /// Discard the finished recording
    pub fn clear_recording(&mut self) {
        self.recorder.clear();
        self.emit(MixerEvent::RecordingStateChanged(self.recorder.state()));
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recorder.state()
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.device.status()
    }

    /// Start the output device. Safe to call repeatedly; a failure is
    /// logged and leaves the device suspended.
    pub fn resume_device(&mut self) -> DeviceStatus {
        let before = self.device.status();
        let after = self.device.resume();
        if after != before {
            self.emit(MixerEvent::DeviceStateChanged(after));
        }
        after
    }

    /// Render the graph directly (offline use)
    pub fn render(&self, out: &mut [f32]) {
        self.graph.lock().render(out);
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let deck_a = self.transports[0].diagnostics();
        let deck_b = self.transports[1].diagnostics();
        let drift = match (deck_a.anchor, deck_b.anchor) {
            (Some(a), Some(b)) => Some(drift_ms(a, b)),
            _ => None,
        };
        Diagnostics {
            deck_a,
            deck_b,
            drift_ms: drift,
            device: self.device.status(),
        }
    }

    /// Stop every source and voice, release the capture tap and close the
    /// device. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.graph.lock().silence();
        if self.recorder.is_recording() {
            if let Err(e) = self.recorder.stop() {
                debug!("Recorder stop on shutdown: {}", e);
            }
        }
        for transport in self.transports.iter_mut() {
            transport.reset(transport.duration);
        }

        self.device.close();
        self.emit(MixerEvent::DeviceStateChanged(self.device.status()));
        info!("Coordinator shut down");
    }
}

impl Drop for MixCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
