//! Audio analysis module for TwinDeck
//!
//! Provides the frequency-domain level meter used for channel and
//! master VU feedback.

mod meter;

pub use meter::{LevelMeter, MeterTap, DEFAULT_FFT_SIZE};
