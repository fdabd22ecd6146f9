//! Error types for the audio core

use thiserror::Error;

/// Errors from a channel's playback source transport
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceError {
    #[error("No playback source connected")]
    NoSource,
    #[error("Playback source was already started")]
    AlreadyStarted,
    #[error("Playback buffer has no frames")]
    EmptyBuffer,
    #[error("Playback source was never started")]
    NotStarted,
    #[error("Playback source already stopped")]
    AlreadyStopped,
}

/// Errors that can occur while acquiring an output device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No audio output devices found")]
    NoDevices,
    #[error("Failed to get device config: {0}")]
    Config(String),
    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),
    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// Errors from the recording capture
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("A recording session is already active")]
    AlreadyRecording,
    #[error("No recording session is active")]
    NotRecording,
    #[error("No finished recording to export")]
    NoArtifact,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encode error: {0}")]
    Encode(String),
}

impl From<hound::Error> for RecordingError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => RecordingError::Io(e),
            other => RecordingError::Encode(other.to_string()),
        }
    }
}

/// Errors from reading or writing the engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Umbrella error for coordinator operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("Engine has been shut down")]
    ShutDown,
}

/// Result type for coordinator operations
pub type EngineResult<T> = Result<T, EngineError>;
