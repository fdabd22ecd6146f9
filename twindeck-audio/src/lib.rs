//! Audio core for TwinDeck - channels, mixer, synth, effects and recording
//!
//! This crate provides the real-time mixing pipeline:
//! - Channel: per-deck gain, pan, sweep filter, 3-band EQ and level meter
//! - Mixer: equal-power crossfader and master bus
//! - Synth: monophonic voice engine routed into a deck or the master bus
//! - Effects: distortion, chorus, delay and convolution reverb
//! - Recorder: lock-free master bus capture with WAV export
//! - Coordinator: per-frame reconciliation of application state into the graph

mod biquad;
mod channel;
mod clock;
mod config;
mod coordinator;
mod device;
mod error;
mod graph;
mod mixer;
mod param;
mod recorder;
mod source;
mod state;
pub mod effects;
pub mod synth;

pub use biquad::{BiquadCoeffs, StereoBiquad};
pub use channel::{
    filter_target, highpass_cutoff, lowpass_cutoff, pan_frame, FilterMode, SignalChannel,
    EQ_HIGH_FREQ, EQ_LOW_FREQ, EQ_MID_FREQ,
};
pub use clock::{AudioClock, FrameClock, ManualClock};
pub use config::EngineConfig;
pub use coordinator::{
    drift_ms, ChannelDiagnostics, ChannelTransport, Diagnostics, MixCoordinator, MixerEvent,
    EVENT_QUEUE_CAPACITY,
};
pub use device::{DeviceStatus, DeviceTarget, OutputDevice};
pub use effects::{DelayMode, EffectsChain, EffectsSettings};
pub use error::{
    ConfigError, DeviceError, EngineError, EngineResult, RecordingError, SourceError,
};
pub use graph::{AudioGraph, SharedGraph, SynthRoute, RENDER_QUANTUM};
pub use mixer::{crossfader_gains, soft_clip, Mixer};
pub use param::SmoothedParam;
pub use recorder::{
    negotiate_encoding, CaptureEncoding, CaptureTap, Recorder, RecordingArtifact,
    RecordingState,
};
pub use source::{AudioBuffer, BufferSource, SourceHandle, SourceStatus};
pub use state::{
    Deck, DeckChannelState, EqBand, MixSnapshot, SourceKind, StateSource, EQ_KILL_THRESHOLD_DB,
    EQ_MAX_DB, EQ_MIN_DB,
};
pub use synth::{SynthSettings, VoiceEngine, Waveform};
