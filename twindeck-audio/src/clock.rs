//! Monotonic audio clocks
//!
//! The coordinator never measures wall time for transport math. It reads
//! an [`AudioClock`], which is either advanced by the render callback
//! ([`FrameClock`]) or driven by hand ([`ManualClock`]) for offline
//! rendering and simulated sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic time source in seconds
pub trait AudioClock: Send + Sync {
    /// Seconds since the clock started
    fn now(&self) -> f64;
}

/// Clock advanced by the number of frames the graph has rendered
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Called by the render side after each rendered block
    #[inline]
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Total frames rendered so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Externally driven clock
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start_secs.to_bits())),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    /// Move forward by `secs`
    pub fn advance(&self, secs: f64) {
        let now = self.now();
        self.set(now + secs.max(0.0));
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clock_counts_seconds() {
        let clock = FrameClock::new(48000);
        assert_eq!(clock.now(), 0.0);
        clock.advance(24000);
        assert!((clock.now() - 0.5).abs() < 1e-12);
        clock.advance(24000);
        assert!((clock.now() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_manual_clock_shared_handles() {
        let clock = ManualClock::new(10.0);
        let reader = clock.clone();
        clock.advance(0.25);
        assert!((reader.now() - 10.25).abs() < 1e-12);
        clock.set(3.0);
        assert_eq!(reader.now(), 3.0);
    }

    #[test]
    fn test_manual_clock_never_runs_backwards_on_advance() {
        let clock = ManualClock::new(1.0);
        clock.advance(-5.0);
        assert_eq!(clock.now(), 1.0);
    }
}
