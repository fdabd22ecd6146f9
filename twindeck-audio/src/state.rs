//! Application-owned mix state read by the coordinator every tick

use crate::source::AudioBuffer;
use std::sync::Arc;

/// Deck identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Deck {
    A,
    B,
}

impl Deck {
    pub const ALL: [Deck; 2] = [Deck::A, Deck::B];

    pub fn index(self) -> usize {
        match self {
            Deck::A => 0,
            Deck::B => 1,
        }
    }

    pub fn label(self) -> char {
        match self {
            Deck::A => 'A',
            Deck::B => 'B',
        }
    }

    pub fn other(self) -> Deck {
        match self {
            Deck::A => Deck::B,
            Deck::B => Deck::A,
        }
    }
}

/// Where a deck's audio comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Decoded buffer played through the channel graph
    #[default]
    LocalBuffer,
    /// Streaming source that plays outside the graph
    External,
}

/// Three-band EQ band selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];
}

/// Lowest EQ band gain in dB (also the kill value)
pub const EQ_MIN_DB: f32 = -48.0;
/// Highest EQ band gain in dB
pub const EQ_MAX_DB: f32 = 6.0;
/// Bands at or below this gain count as killed
pub const EQ_KILL_THRESHOLD_DB: f32 = -40.0;

/// Declarative state of one deck, owned by the application
#[derive(Debug, Clone)]
pub struct DeckChannelState {
    /// Linear channel gain (0.0 - 2.0)
    pub gain: f32,
    /// Stereo pan (-1.0 left, 1.0 right)
    pub pan: f32,
    pub eq_low_db: f32,
    pub eq_mid_db: f32,
    pub eq_high_db: f32,
    /// Filter knob (-1.0 lowpass sweep, 1.0 highpass sweep)
    pub filter: f32,
    /// Filter Q
    pub resonance: f32,
    /// Playback rate (1.0 = original speed)
    pub rate: f32,
    pub playing: bool,
    /// Last position the application stored, in seconds
    pub position: f64,
    /// Track duration in seconds
    pub duration: f64,
    pub buffer: Option<Arc<AudioBuffer>>,
    pub source_kind: SourceKind,
    /// Last level the application stored (0.0 - 1.0)
    pub level: f32,
}

impl Default for DeckChannelState {
    fn default() -> Self {
        Self {
            gain: 1.0,
            pan: 0.0,
            eq_low_db: 0.0,
            eq_mid_db: 0.0,
            eq_high_db: 0.0,
            filter: 0.0,
            resonance: 0.707,
            rate: 1.0,
            playing: false,
            position: 0.0,
            duration: 0.0,
            buffer: None,
            source_kind: SourceKind::LocalBuffer,
            level: 0.0,
        }
    }
}

impl DeckChannelState {
    /// Attach a decoded buffer and take its duration
    pub fn with_buffer(mut self, buffer: Arc<AudioBuffer>) -> Self {
        self.duration = buffer.duration();
        self.buffer = Some(buffer);
        self
    }

    pub fn eq_gain(&self, band: EqBand) -> f32 {
        match band {
            EqBand::Low => self.eq_low_db,
            EqBand::Mid => self.eq_mid_db,
            EqBand::High => self.eq_high_db,
        }
    }

    /// Set a band gain, clamped to the EQ range
    pub fn set_eq_gain(&mut self, band: EqBand, gain_db: f32) {
        let gain_db = gain_db.clamp(EQ_MIN_DB, EQ_MAX_DB);
        match band {
            EqBand::Low => self.eq_low_db = gain_db,
            EqBand::Mid => self.eq_mid_db = gain_db,
            EqBand::High => self.eq_high_db = gain_db,
        }
    }

    pub fn is_killed(&self, band: EqBand) -> bool {
        self.eq_gain(band) <= EQ_KILL_THRESHOLD_DB
    }

    /// Kill a band, or restore it to 0 dB if already killed.
    ///
    /// Kill shares the fader value, so a fine gain set before the kill
    /// is not remembered.
    pub fn toggle_kill(&mut self, band: EqBand) {
        let next = if self.is_killed(band) { 0.0 } else { EQ_MIN_DB };
        self.set_eq_gain(band, next);
    }

    /// Playback rate limited to the supported range
    pub fn effective_rate(&self) -> f32 {
        if self.rate.is_finite() {
            self.rate.clamp(0.5, 2.0)
        } else {
            1.0
        }
    }
}

/// Everything the coordinator reads from the application per tick
#[derive(Debug, Clone)]
pub struct MixSnapshot {
    pub deck_a: DeckChannelState,
    pub deck_b: DeckChannelState,
    /// Crossfader position (0.0 = full A, 1.0 = full B)
    pub crossfader: f32,
    pub master_volume: f32,
}

impl Default for MixSnapshot {
    fn default() -> Self {
        Self {
            deck_a: DeckChannelState::default(),
            deck_b: DeckChannelState::default(),
            crossfader: 0.5,
            master_volume: 1.0,
        }
    }
}

impl MixSnapshot {
    pub fn deck(&self, deck: Deck) -> &DeckChannelState {
        match deck {
            Deck::A => &self.deck_a,
            Deck::B => &self.deck_b,
        }
    }

    pub fn deck_mut(&mut self, deck: Deck) -> &mut DeckChannelState {
        match deck {
            Deck::A => &mut self.deck_a,
            Deck::B => &mut self.deck_b,
        }
    }
}

/// Pull interface over the application's state store
pub trait StateSource {
    /// Current state; called once per tick
    fn snapshot(&self) -> MixSnapshot;
}

impl StateSource for MixSnapshot {
    fn snapshot(&self) -> MixSnapshot {
        self.clone()
    }
}

impl<T: StateSource> StateSource for parking_lot::Mutex<T> {
    fn snapshot(&self) -> MixSnapshot {
        self.lock().snapshot()
    }
}

impl<T: StateSource + ?Sized> StateSource for Arc<T> {
    fn snapshot(&self) -> MixSnapshot {
        (**self).snapshot()
    }
}
