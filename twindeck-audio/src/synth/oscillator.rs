//! Band-limited oscillators

use std::f32::consts::PI;

/// Oscillator waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    Sine,
    #[default]
    Saw,
    Square,
    Triangle,
}

impl Waveform {
    /// Parse a waveform name (`sine`, `saw`/`sawtooth`, `square`, `triangle`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sine" => Some(Waveform::Sine),
            "saw" | "sawtooth" => Some(Waveform::Saw),
            "square" => Some(Waveform::Square),
            "triangle" | "tri" => Some(Waveform::Triangle),
            _ => None,
        }
    }
}

/// Frequency in Hz for a MIDI note shifted by whole octaves and fine semitones
pub fn note_frequency(note: u8, octave: i32, fine_semitones: f32) -> f32 {
    let semitones = note as f64 + 12.0 * octave as f64 + fine_semitones as f64 - 69.0;
    (440.0 * 2f64.powf(semitones / 12.0)) as f32
}

/// PolyBLEP residual for a discontinuity at phase 0
#[inline]
fn poly_blep(phase: f32, inc: f32) -> f32 {
    if phase < inc {
        let t = phase / inc;
        2.0 * t - t * t - 1.0
    } else if phase > 1.0 - inc {
        let t = (phase - 1.0) / inc;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// Phase-accumulating oscillator
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f32,
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Self { waveform, phase: 0.0 }
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// Produce one sample at `freq` and advance the phase
    #[inline]
    pub fn next(&mut self, freq: f32, sample_rate: f32) -> f32 {
        let inc = (freq / sample_rate).clamp(0.0, 0.5);
        let phase = self.phase;

        let value = match self.waveform {
            Waveform::Sine => (2.0 * PI * phase).sin(),
            Waveform::Saw => 2.0 * phase - 1.0 - poly_blep(phase, inc),
            Waveform::Square => {
                let naive = if phase < 0.5 { 1.0 } else { -1.0 };
                naive + poly_blep(phase, inc) - poly_blep((phase + 0.5).fract(), inc)
            }
            Waveform::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    3.0 - 4.0 * phase
                }
            }
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_law() {
        assert!((note_frequency(69, 0, 0.0) - 440.0).abs() < 1e-4);
        assert!((note_frequency(81, 0, 0.0) - 880.0).abs() < 1e-3);
        assert!((note_frequency(69, -1, 0.0) - 220.0).abs() < 1e-4);
        assert!((note_frequency(57, 1, 0.0) - 440.0).abs() < 1e-4);
    }

    #[test]
    fn test_fine_tune_is_semitones() {
        let up = note_frequency(69, 0, 1.0);
        assert!((up - note_frequency(70, 0, 0.0)).abs() < 1e-3);
    }

    #[test]
    fn test_waveforms_bounded() {
        for waveform in [Waveform::Sine, Waveform::Saw, Waveform::Square, Waveform::Triangle] {
            let mut osc = Oscillator::new(waveform);
            for _ in 0..48000 {
                let s = osc.next(440.0, 48000.0);
                assert!(s.abs() <= 1.01, "{:?} produced {}", waveform, s);
            }
        }
    }

    #[test]
    fn test_waveform_names() {
        assert_eq!(Waveform::from_name("Sawtooth"), Some(Waveform::Saw));
        assert_eq!(Waveform::from_name("noise"), None);
    }
}
