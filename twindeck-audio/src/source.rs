//! Decoded audio buffers and one-shot playback sources

use crate::error::SourceError;
use crate::param::SmoothedParam;
use std::sync::Arc;

/// Decoded audio ready for playback (interleaved stereo, f32)
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap interleaved stereo samples; an odd trailing sample is padded
    pub fn from_interleaved(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        if samples.len() % 2 != 0 {
            samples.push(0.0);
        }
        Self {
            samples,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Duplicate a mono signal onto both channels
    pub fn from_mono(samples: &[f32], sample_rate: u32) -> Self {
        let stereo = samples.iter().flat_map(|&s| [s, s]).collect();
        Self::from_interleaved(stereo, sample_rate)
    }

    /// Silent buffer of the given length
    pub fn silence(duration_secs: f64, sample_rate: u32) -> Self {
        let frames = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::from_interleaved(vec![0.0; frames * 2], sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    fn frame(&self, index: usize) -> (f32, f32) {
        (self.samples[index * 2], self.samples[index * 2 + 1])
    }
}

/// Identifies one connected playback source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle(u64);

impl SourceHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Lifecycle of a playback source. A source starts at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    /// Connected, not started yet
    Idle,
    Playing,
    /// Ran off the end of its buffer
    Finished,
    /// Stopped explicitly
    Stopped,
}

/// One-shot buffer player bound to a single decoded buffer
pub struct BufferSource {
    handle: SourceHandle,
    buffer: Arc<AudioBuffer>,
    /// Read position in buffer frames (fractional)
    position: f64,
    /// Buffer frames advanced per output frame at rate 1.0
    base_step: f64,
    status: SourceStatus,
}

impl BufferSource {
    pub(crate) fn new(handle: SourceHandle, buffer: Arc<AudioBuffer>, output_rate: u32) -> Self {
        let base_step = buffer.sample_rate() as f64 / output_rate.max(1) as f64;
        Self {
            handle,
            buffer,
            position: 0.0,
            base_step,
            status: SourceStatus::Idle,
        }
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle
    }

    pub fn status(&self) -> SourceStatus {
        self.status
    }

    pub fn buffer(&self) -> &Arc<AudioBuffer> {
        &self.buffer
    }

    /// Current read position in seconds of buffer time
    pub fn position_secs(&self) -> f64 {
        self.position / self.buffer.sample_rate() as f64
    }

    /// Begin playback at `offset_secs`
    pub fn start(&mut self, offset_secs: f64) -> Result<(), SourceError> {
        if self.status != SourceStatus::Idle {
            return Err(SourceError::AlreadyStarted);
        }
        if self.buffer.frames() == 0 {
            return Err(SourceError::EmptyBuffer);
        }
        let max = self.buffer.frames() as f64;
        self.position = (offset_secs.max(0.0) * self.buffer.sample_rate() as f64).min(max);
        self.status = SourceStatus::Playing;
        Ok(())
    }

    /// Stop playback; stopping twice reports `AlreadyStopped`
    pub fn stop(&mut self) -> Result<(), SourceError> {
        match self.status {
            SourceStatus::Idle => Err(SourceError::NotStarted),
            SourceStatus::Stopped | SourceStatus::Finished => Err(SourceError::AlreadyStopped),
            SourceStatus::Playing => {
                self.status = SourceStatus::Stopped;
                Ok(())
            }
        }
    }

    /// Render into stereo interleaved `out` (overwrites), advancing by `rate`
    pub fn render(&mut self, out: &mut [f32], rate: &mut SmoothedParam) {
        if self.status != SourceStatus::Playing {
            out.fill(0.0);
            // Keep the rate ramp moving so it stays in sync with the UI
            rate.advance(out.len() / 2);
            return;
        }

        let frames = self.buffer.frames();
        for frame in out.chunks_exact_mut(2) {
            let step = self.base_step * rate.next() as f64;
            let index = self.position as usize;

            if frames == 0 || index >= frames {
                self.status = SourceStatus::Finished;
                frame[0] = 0.0;
                frame[1] = 0.0;
                continue;
            }

            // Linear interpolation for non-integer positions
            let (l0, r0) = self.buffer.frame(index);
            let (l1, r1) = if index + 1 < frames {
                self.buffer.frame(index + 1)
            } else {
                (0.0, 0.0)
            };
            let frac = self.position.fract() as f32;
            frame[0] = l0 + frac * (l1 - l0);
            frame[1] = r0 + frac * (r1 - r0);

            self.position += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(frames: usize, sample_rate: u32) -> Arc<AudioBuffer> {
        let mono: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        Arc::new(AudioBuffer::from_mono(&mono, sample_rate))
    }

    #[test]
    fn test_buffer_duration() {
        let buffer = AudioBuffer::silence(10.0, 48000);
        assert_eq!(buffer.frames(), 480000);
        assert!((buffer.duration() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_odd_interleaved_is_padded() {
        let buffer = AudioBuffer::from_interleaved(vec![0.1, 0.2, 0.3], 44100);
        assert_eq!(buffer.frames(), 2);
    }

    #[test]
    fn test_start_at_offset() {
        let mut source = BufferSource::new(SourceHandle::new(1), ramp_buffer(100, 100), 100);
        let mut rate = SmoothedParam::new(1.0, 0.0, 100.0);
        source.start(0.5).unwrap();

        let mut out = vec![0.0; 4];
        source.render(&mut out, &mut rate);
        assert_eq!(out, vec![50.0, 50.0, 51.0, 51.0]);
    }

    #[test]
    fn test_stop_twice_reports_already_stopped() {
        let mut source = BufferSource::new(SourceHandle::new(1), ramp_buffer(10, 100), 100);
        assert_eq!(source.stop(), Err(SourceError::NotStarted));
        source.start(0.0).unwrap();
        assert!(source.stop().is_ok());
        assert_eq!(source.stop(), Err(SourceError::AlreadyStopped));
    }

    #[test]
    fn test_start_is_one_shot() {
        let mut source = BufferSource::new(SourceHandle::new(1), ramp_buffer(10, 100), 100);
        source.start(0.0).unwrap();
        assert_eq!(source.start(0.0), Err(SourceError::AlreadyStarted));
    }

    #[test]
    fn test_empty_buffer_cannot_start() {
        let empty = Arc::new(AudioBuffer::from_interleaved(Vec::new(), 100));
        let mut source = BufferSource::new(SourceHandle::new(1), empty, 100);
        assert_eq!(source.start(0.0), Err(SourceError::EmptyBuffer));
        assert_eq!(source.status(), SourceStatus::Idle);
    }

    #[test]
    fn test_runs_off_end_and_finishes() {
        let mut source = BufferSource::new(SourceHandle::new(1), ramp_buffer(4, 100), 100);
        let mut rate = SmoothedParam::new(1.0, 0.0, 100.0);
        source.start(0.0).unwrap();

        let mut out = vec![1.0; 16];
        source.render(&mut out, &mut rate);
        assert_eq!(source.status(), SourceStatus::Finished);
        assert!(out[8..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_double_rate_skips_frames() {
        let mut source = BufferSource::new(SourceHandle::new(1), ramp_buffer(100, 100), 100);
        let mut rate = SmoothedParam::new(2.0, 0.0, 100.0);
        source.start(0.0).unwrap();

        let mut out = vec![0.0; 6];
        source.render(&mut out, &mut rate);
        assert_eq!(out, vec![0.0, 0.0, 2.0, 2.0, 4.0, 4.0]);
    }
}
