//! Output device acquisition
//!
//! Acquisition never fails: the default device is tried first, then every
//! other output device the host reports, and finally a null sink that
//! renders the graph in real time with no audible output. Every stream
//! starts suspended; [`OutputDevice::resume`] starts it.

use crate::error::DeviceError;
use crate::graph::{SharedGraph, RENDER_QUANTUM};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lifecycle of the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Acquired but not rendering
    Suspended,
    Running,
    /// Released; cannot be resumed
    Closed,
}

/// A device chosen for output, before a graph is attached
pub enum DeviceTarget {
    Hardware {
        device: cpal::Device,
        config: cpal::StreamConfig,
        name: String,
    },
    /// Real-time renderer without audible output
    NullSink { sample_rate: u32 },
    /// Nothing renders; the owner drives the graph by hand
    Detached { sample_rate: u32 },
}

impl DeviceTarget {
    /// Find an output, falling back tier by tier
    pub fn acquire(preferred_rate: u32) -> Self {
        let host = cpal::default_host();

        match default_target(&host, preferred_rate) {
            Ok(target) => return target,
            Err(e) => warn!("Default output device unavailable: {}", e),
        }

        match enumerated_target(&host, preferred_rate) {
            Ok(target) => return target,
            Err(e) => warn!("No usable output device: {}", e),
        }

        warn!("Falling back to null sink at {} Hz", preferred_rate);
        DeviceTarget::NullSink {
            sample_rate: preferred_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            DeviceTarget::Hardware { config, .. } => config.sample_rate.0,
            DeviceTarget::NullSink { sample_rate } | DeviceTarget::Detached { sample_rate } => {
                *sample_rate
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DeviceTarget::Hardware { name, .. } => name,
            DeviceTarget::NullSink { .. } => "null sink",
            DeviceTarget::Detached { .. } => "detached",
        }
    }
}

fn default_target(host: &cpal::Host, preferred_rate: u32) -> Result<DeviceTarget, DeviceError> {
    let device = host.default_output_device().ok_or(DeviceError::NoDevices)?;
    hardware_target(device, preferred_rate)
}

fn enumerated_target(host: &cpal::Host, preferred_rate: u32) -> Result<DeviceTarget, DeviceError> {
    let devices = host
        .output_devices()
        .map_err(|e| DeviceError::Config(e.to_string()))?;

    let mut last_err = DeviceError::NoDevices;
    for device in devices {
        match hardware_target(device, preferred_rate) {
            Ok(target) => return Ok(target),
            Err(e) => {
                debug!("Skipping output device: {}", e);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

fn hardware_target(device: cpal::Device, preferred_rate: u32) -> Result<DeviceTarget, DeviceError> {
    let name = device.name().unwrap_or_else(|_| "unknown device".to_string());
    let config = select_config(&device, preferred_rate)?;
    Ok(DeviceTarget::Hardware {
        device,
        config,
        name,
    })
}

/// Pick an f32 configuration, preferring stereo at `preferred_rate`
fn select_config(device: &cpal::Device, preferred_rate: u32) -> Result<cpal::StreamConfig, DeviceError> {
    let rate = cpal::SampleRate(preferred_rate);

    if let Ok(ranges) = device.supported_output_configs() {
        let mut candidates: Vec<_> = ranges
            .filter(|r| r.sample_format() == cpal::SampleFormat::F32)
            .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
            .collect();
        candidates.sort_by_key(|r| r.channels() != 2);
        if let Some(range) = candidates.into_iter().next() {
            return Ok(range.with_sample_rate(rate).config());
        }
    }

    let default = device
        .default_output_config()
        .map_err(|e| DeviceError::Config(e.to_string()))?;
    if default.sample_format() != cpal::SampleFormat::F32 {
        return Err(DeviceError::UnsupportedFormat(format!("{:?}", default.sample_format())));
    }
    Ok(default.config())
}

enum Backend {
    Stream(cpal::Stream),
    NullSink {
        stop: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    },
    Detached,
}

/// Output stream bound to a shared graph
pub struct OutputDevice {
    backend: Backend,
    name: String,
    sample_rate: u32,
    channels: usize,
    status: DeviceStatus,
    /// Render gate read by the callback
    running: Arc<AtomicBool>,
}

impl OutputDevice {
    /// Attach `graph` to `target`. A stream that cannot be built degrades
    /// to a null sink.
    pub fn open(target: DeviceTarget, graph: SharedGraph) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let sample_rate = target.sample_rate();

        match target {
            DeviceTarget::Hardware {
                device,
                config,
                name,
            } => match build_stream(&device, &config, graph.clone(), running.clone()) {
                Ok(stream) => {
                    info!(
                        "Output: {} ({} Hz, {} channels)",
                        name, config.sample_rate.0, config.channels
                    );
                    Self {
                        backend: Backend::Stream(stream),
                        name,
                        sample_rate,
                        channels: config.channels as usize,
                        status: DeviceStatus::Suspended,
                        running,
                    }
                }
                Err(e) => {
                    warn!("{} on {}, falling back to null sink", e, name);
                    Self::null_sink(sample_rate, graph, running)
                }
            },
            DeviceTarget::NullSink { sample_rate } => Self::null_sink(sample_rate, graph, running),
            DeviceTarget::Detached { sample_rate } => Self::detached(sample_rate),
        }
    }

    /// Device that never renders; the graph is driven by its owner
    pub fn detached(sample_rate: u32) -> Self {
        Self {
            backend: Backend::Detached,
            name: "detached".to_string(),
            sample_rate,
            channels: 2,
            status: DeviceStatus::Suspended,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    fn null_sink(sample_rate: u32, graph: SharedGraph, running: Arc<AtomicBool>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let spawned = {
            let stop = stop.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("twindeck-null-sink".to_string())
                .spawn(move || run_null_sink(graph, sample_rate, running, stop))
        };

        match spawned {
            Ok(thread) => Self {
                backend: Backend::NullSink {
                    stop,
                    thread: Some(thread),
                },
                name: "null sink".to_string(),
                sample_rate,
                channels: 2,
                status: DeviceStatus::Suspended,
                running,
            },
            Err(e) => {
                warn!("Failed to start null sink thread: {}", e);
                Self::detached(sample_rate)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    /// True when no hardware stream backs this device
    pub fn is_fallback(&self) -> bool {
        !matches!(self.backend, Backend::Stream(_))
    }

    /// Start rendering. Idempotent; a failure leaves the device suspended.
    pub fn resume(&mut self) -> DeviceStatus {
        if self.status != DeviceStatus::Suspended {
            return self.status;
        }

        if let Backend::Stream(stream) = &self.backend {
            if let Err(e) = stream.play() {
                warn!("{}", DeviceError::StreamPlay(e.to_string()));
                return self.status;
            }
        }

        self.running.store(true, Ordering::Release);
        self.status = DeviceStatus::Running;
        debug!("Output {} running", self.name);
        self.status
    }

    /// Stop rendering without releasing the device
    pub fn suspend(&mut self) -> DeviceStatus {
        if self.status != DeviceStatus::Running {
            return self.status;
        }

        self.running.store(false, Ordering::Release);
        if let Backend::Stream(stream) = &self.backend {
            if let Err(e) = stream.pause() {
                debug!("Stream pause failed: {}", e);
            }
        }
        self.status = DeviceStatus::Suspended;
        self.status
    }

    /// Release the stream or sink thread. Idempotent.
    pub fn close(&mut self) {
        if self.status == DeviceStatus::Closed {
            return;
        }
        self.running.store(false, Ordering::Release);

        match std::mem::replace(&mut self.backend, Backend::Detached) {
            Backend::Stream(stream) => drop(stream),
            Backend::NullSink { stop, mut thread } => {
                stop.store(true, Ordering::Release);
                if let Some(handle) = thread.take() {
                    if handle.join().is_err() {
                        warn!("Null sink thread panicked");
                    }
                }
            }
            Backend::Detached => {}
        }

        self.status = DeviceStatus::Closed;
        debug!("Output {} closed", self.name);
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    graph: SharedGraph,
    running: Arc<AtomicBool>,
) -> Result<cpal::Stream, DeviceError> {
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Acquire) {
                    data.fill(0.0);
                    return;
                }
                // Never block the real-time thread; contention renders silence
                match graph.try_lock() {
                    Some(mut graph) => graph.render_interleaved(data, channels),
                    None => data.fill(0.0),
                }
            },
            |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| DeviceError::StreamBuild(e.to_string()))
}

/// Render blocks at the pace of a real device
fn run_null_sink(graph: SharedGraph, sample_rate: u32, running: Arc<AtomicBool>, stop: Arc<AtomicBool>) {
    const BLOCK_FRAMES: usize = RENDER_QUANTUM * 4;
    let block_duration = Duration::from_secs_f64(BLOCK_FRAMES as f64 / sample_rate.max(1) as f64);
    let mut scratch = vec![0.0f32; BLOCK_FRAMES * 2];
    let mut deadline = Instant::now();

    while !stop.load(Ordering::Acquire) {
        if !running.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(10));
            deadline = Instant::now();
            continue;
        }

        if let Some(mut graph) = graph.try_lock() {
            graph.render(&mut scratch);
        }

        deadline += block_duration;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else if now - deadline > block_duration * 8 {
            // Fell far behind; drop the backlog instead of rendering in a burst
            deadline = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AudioGraph;

    #[test]
    fn test_detached_resume_is_idempotent() {
        let mut device = OutputDevice::detached(48000);
        assert_eq!(device.status(), DeviceStatus::Suspended);
        assert_eq!(device.resume(), DeviceStatus::Running);
        assert_eq!(device.resume(), DeviceStatus::Running);
        assert_eq!(device.suspend(), DeviceStatus::Suspended);
        device.close();
        device.close();
        assert_eq!(device.status(), DeviceStatus::Closed);
        assert_eq!(device.resume(), DeviceStatus::Closed);
    }

    #[test]
    fn test_null_sink_renders_only_while_running() {
        let graph = AudioGraph::new(48000, 0.001, 0.05).into_shared();
        let clock = graph.lock().clock().clone();
        let mut device = OutputDevice::open(DeviceTarget::NullSink { sample_rate: 48000 }, graph);
        assert!(device.is_fallback());

        thread::sleep(Duration::from_millis(40));
        assert_eq!(clock.frames(), 0);

        device.resume();
        thread::sleep(Duration::from_millis(100));
        assert!(clock.frames() > 0);

        device.close();
        let frames = clock.frames();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(clock.frames(), frames);
    }

    #[test]
    fn test_target_names() {
        assert_eq!(DeviceTarget::Detached { sample_rate: 44100 }.sample_rate(), 44100);
        assert_eq!(DeviceTarget::NullSink { sample_rate: 48000 }.name(), "null sink");
    }
}
