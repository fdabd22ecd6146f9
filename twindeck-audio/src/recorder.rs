//! Master bus recording
//!
//! The render thread writes post-master samples into a [`CaptureTap`]
//! (the producer half of a lock-free ring). The main thread drains the
//! consumer half into chunks on every poll and joins them into a
//! [`RecordingArtifact`] on stop. Artifacts export as WAV via `hound`.

use crate::error::RecordingError;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::fs;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Seconds of audio the capture ring can hold between polls
const RING_SECONDS: usize = 2;

/// Output format of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEncoding {
    WavFloat32,
    WavPcm24,
    WavPcm16,
}

impl CaptureEncoding {
    /// Parse an encoding name (`wav-f32`, `wav-pcm24`, `wav-pcm16`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "wav-f32" | "wav-float32" => Some(CaptureEncoding::WavFloat32),
            "wav-pcm24" | "wav-s24" => Some(CaptureEncoding::WavPcm24),
            "wav-pcm16" | "wav-s16" | "wav" => Some(CaptureEncoding::WavPcm16),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CaptureEncoding::WavFloat32 => "wav-f32",
            CaptureEncoding::WavPcm24 => "wav-pcm24",
            CaptureEncoding::WavPcm16 => "wav-pcm16",
        }
    }

    fn wav_spec(self, channels: u16, sample_rate: u32) -> hound::WavSpec {
        let (bits_per_sample, sample_format) = match self {
            CaptureEncoding::WavFloat32 => (32, hound::SampleFormat::Float),
            CaptureEncoding::WavPcm24 => (24, hound::SampleFormat::Int),
            CaptureEncoding::WavPcm16 => (16, hound::SampleFormat::Int),
        };
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format,
        }
    }
}

/// Pick the first supported encoding from a preference list.
///
/// Unknown names are skipped with a warning; an exhausted list falls
/// back to 16-bit PCM WAV.
pub fn negotiate_encoding<S: AsRef<str>>(preferences: &[S]) -> CaptureEncoding {
    for name in preferences {
        match CaptureEncoding::from_name(name.as_ref()) {
            Some(encoding) => return encoding,
            None => warn!("Skipping unsupported capture encoding '{}'", name.as_ref()),
        }
    }
    warn!("No configured capture encoding is supported, using wav-pcm16");
    CaptureEncoding::WavPcm16
}

/// Render-side half of the capture stream
pub struct CaptureTap {
    producer: HeapProd<f32>,
    dropped: Arc<AtomicUsize>,
}

impl CaptureTap {
    /// Push interleaved samples; samples that do not fit are counted and dropped
    #[inline]
    pub fn push(&mut self, samples: &[f32]) {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            self.dropped
                .fetch_add(samples.len() - written, Ordering::Relaxed);
        }
    }
}

/// Finished recording
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    encoding: CaptureEncoding,
    duration: Duration,
}

impl RecordingArtifact {
    /// Interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn encoding(&self) -> CaptureEncoding {
        self.encoding
    }

    /// Wall-clock length of the session
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Length of the captured audio
    pub fn audio_duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Encode as WAV into any seekable writer
    pub fn write_wav<W: Write + Seek>(&self, writer: W) -> Result<(), RecordingError> {
        let spec = self.encoding.wav_spec(self.channels, self.sample_rate);
        let mut wav = hound::WavWriter::new(writer, spec)?;

        match self.encoding {
            CaptureEncoding::WavFloat32 => {
                for &s in &self.samples {
                    wav.write_sample(s)?;
                }
            }
            CaptureEncoding::WavPcm24 => {
                for &s in &self.samples {
                    wav.write_sample((s.clamp(-1.0, 1.0) * 8_388_607.0) as i32)?;
                }
            }
            CaptureEncoding::WavPcm16 => {
                for &s in &self.samples {
                    wav.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)?;
                }
            }
        }

        wav.finalize()?;
        Ok(())
    }
}

/// Snapshot reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingState {
    pub is_recording: bool,
    pub duration: Duration,
    pub has_artifact: bool,
}

struct Session {
    consumer: HeapCons<f32>,
    chunks: Vec<Vec<f32>>,
    started: Instant,
    last_tick: Instant,
    encoding: CaptureEncoding,
    dropped: Arc<AtomicUsize>,
}

impl Session {
    fn drain(&mut self) {
        let available = self.consumer.occupied_len();
        if available == 0 {
            return;
        }
        let mut chunk = vec![0.0; available];
        let read = self.consumer.pop_slice(&mut chunk);
        chunk.truncate(read);
        self.chunks.push(chunk);
    }
}

/// Recording capture: one session at a time
pub struct Recorder {
    sample_rate: u32,
    channels: u16,
    encodings: Vec<String>,
    recording_dir: PathBuf,
    tick: Duration,
    session: Option<Session>,
    artifact: Option<RecordingArtifact>,
    duration: Duration,
}

impl Recorder {
    pub fn new(
        sample_rate: u32,
        encodings: Vec<String>,
        recording_dir: PathBuf,
        tick: Duration,
    ) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: 2,
            encodings,
            recording_dir,
            tick,
            session: None,
            artifact: None,
            duration: Duration::ZERO,
        }
    }

    pub fn recording_dir(&self) -> &Path {
        &self.recording_dir
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Elapsed time of the current session, or of the finished artifact
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn artifact(&self) -> Option<&RecordingArtifact> {
        self.artifact.as_ref()
    }

    pub fn state(&self) -> RecordingState {
        RecordingState {
            is_recording: self.is_recording(),
            duration: self.duration,
            has_artifact: self.artifact.is_some(),
        }
    }

    /// Begin a session now
    pub fn start(&mut self) -> Result<CaptureTap, RecordingError> {
        self.start_at(Instant::now())
    }

    /// Begin a session at `now`; returns the tap to install on the master bus.
    /// Any previous artifact is discarded.
    pub fn start_at(&mut self, now: Instant) -> Result<CaptureTap, RecordingError> {
        if self.session.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        let encoding = negotiate_encoding(self.encodings.as_slice());
        let capacity = self.sample_rate as usize * self.channels as usize * RING_SECONDS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let dropped = Arc::new(AtomicUsize::new(0));

        self.artifact = None;
        self.duration = Duration::ZERO;
        self.session = Some(Session {
            consumer,
            chunks: Vec::new(),
            started: now,
            last_tick: now,
            encoding,
            dropped: Arc::clone(&dropped),
        });

        info!("Recording started ({})", encoding.name());
        Ok(CaptureTap { producer, dropped })
    }

    /// Drain captured audio now
    pub fn poll(&mut self) -> Option<RecordingState> {
        self.poll_at(Instant::now())
    }

    /// Drain captured audio; returns a state update once per tick interval
    pub fn poll_at(&mut self, now: Instant) -> Option<RecordingState> {
        let session = self.session.as_mut()?;
        session.drain();

        if now.saturating_duration_since(session.last_tick) < self.tick {
            return None;
        }
        session.last_tick = now;
        self.duration = now.saturating_duration_since(session.started);
        Some(self.state())
    }

    /// Finish the session now
    pub fn stop(&mut self) -> Result<&RecordingArtifact, RecordingError> {
        self.stop_at(Instant::now())
    }

    /// Finish the session and join its chunks into one artifact.
    ///
    /// The tap should already be removed from the render graph so that
    /// the final drain sees every sample.
    pub fn stop_at(&mut self, now: Instant) -> Result<&RecordingArtifact, RecordingError> {
        let mut session = self.session.take().ok_or(RecordingError::NotRecording)?;
        session.drain();

        let dropped = session.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("Recording dropped {} samples (capture ring overflow)", dropped);
        }

        let samples = session.chunks.concat();
        self.duration = now.saturating_duration_since(session.started);
        info!(
            "Recording stopped: {:.1}s, {} chunks",
            self.duration.as_secs_f32(),
            session.chunks.len()
        );

        let artifact = self.artifact.insert(RecordingArtifact {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
            encoding: session.encoding,
            duration: self.duration,
        });
        Ok(artifact)
    }

    /// Write the artifact as `filename` inside the recordings directory
    pub fn export(&self, filename: &str) -> Result<PathBuf, RecordingError> {
        let artifact = self.artifact.as_ref().ok_or(RecordingError::NoArtifact)?;

        fs::create_dir_all(&self.recording_dir)?;
        let mut path = self.recording_dir.join(filename);
        if path.extension().is_none() {
            path.set_extension("wav");
        }

        let file = fs::File::create(&path)?;
        artifact.write_wav(BufWriter::new(file))?;
        debug!("Exported recording to {}", path.display());
        Ok(path)
    }

    /// Discard the artifact and reset the duration
    pub fn clear(&mut self) {
        self.artifact = None;
        if self.session.is_none() {
            self.duration = Duration::ZERO;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(dir: &str) -> Recorder {
        Recorder::new(
            1000,
            vec!["wav-f32".to_string()],
            std::env::temp_dir().join(dir),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_negotiate_skips_unknown() {
        let prefs = ["webm-opus", "wav-pcm24", "wav-f32"];
        assert_eq!(negotiate_encoding(&prefs[..]), CaptureEncoding::WavPcm24);
    }

    #[test]
    fn test_negotiate_falls_back_to_pcm16() {
        let prefs = ["ogg", "mp3"];
        assert_eq!(negotiate_encoding(&prefs[..]), CaptureEncoding::WavPcm16);
        let empty: [&str; 0] = [];
        assert_eq!(negotiate_encoding(&empty[..]), CaptureEncoding::WavPcm16);
    }

    #[test]
    fn test_double_start_rejected() {
        let mut rec = recorder("twindeck-rec-double");
        let _tap = rec.start().unwrap();
        assert!(matches!(rec.start(), Err(RecordingError::AlreadyRecording)));
    }

    #[test]
    fn test_stop_while_idle() {
        let mut rec = recorder("twindeck-rec-idle");
        assert!(matches!(rec.stop(), Err(RecordingError::NotRecording)));
    }

    #[test]
    fn test_export_without_artifact() {
        let rec = recorder("twindeck-rec-none");
        assert!(matches!(rec.export("take.wav"), Err(RecordingError::NoArtifact)));
    }

    #[test]
    fn test_chunks_join_into_artifact() {
        let mut rec = recorder("twindeck-rec-join");
        let t0 = Instant::now();
        let mut tap = rec.start_at(t0).unwrap();

        tap.push(&[0.1, 0.1, 0.2, 0.2]);
        assert!(rec.poll_at(t0 + Duration::from_millis(10)).is_none());
        tap.push(&[0.3, 0.3]);
        let state = rec.poll_at(t0 + Duration::from_millis(120)).unwrap();
        assert!(state.is_recording);
        assert_eq!(state.duration, Duration::from_millis(120));

        tap.push(&[0.4, 0.4]);
        let artifact = rec.stop_at(t0 + Duration::from_millis(250)).unwrap();
        assert_eq!(artifact.samples(), &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4]);
        assert_eq!(artifact.encoding(), CaptureEncoding::WavFloat32);
        assert_eq!(artifact.duration(), Duration::from_millis(250));
        assert!(!rec.is_recording());
    }

    #[test]
    fn test_export_writes_wav() {
        let mut rec = recorder("twindeck-rec-export");
        let mut tap = rec.start().unwrap();
        tap.push(&[0.5, -0.5, 0.25, -0.25]);
        rec.stop().unwrap();

        let path = rec.export("take").unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 1000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.5, -0.5, 0.25, -0.25]);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_pcm16_encoding() {
        let mut rec = Recorder::new(
            1000,
            vec!["wav-pcm16".to_string()],
            std::env::temp_dir(),
            Duration::from_millis(100),
        );
        let mut tap = rec.start().unwrap();
        tap.push(&[1.0, -1.0]);
        rec.stop().unwrap();

        let mut bytes = std::io::Cursor::new(Vec::new());
        rec.artifact().unwrap().write_wav(&mut bytes).unwrap();
        bytes.set_position(0);
        let mut reader = hound::WavReader::new(bytes).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![32767, -32767]);
    }

    #[test]
    fn test_clear_and_restart_discard_artifact() {
        let mut rec = recorder("twindeck-rec-clear");
        let _tap = rec.start().unwrap();
        rec.stop().unwrap();
        assert!(rec.artifact().is_some());
        rec.clear();
        assert!(rec.artifact().is_none());
        assert_eq!(rec.duration(), Duration::ZERO);

        let _tap = rec.start().unwrap();
        rec.stop().unwrap();
        let _tap = rec.start().unwrap();
        assert!(rec.artifact().is_none());
    }
}
