//! Engine configuration persistence
//!
//! Plain `key=value` lines, `#` comments. Unknown keys are ignored and a
//! bad value keeps the default for that key.

use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Graph sample rate when no device dictates one
    pub sample_rate: u32,
    /// Reconciliation ticks per second
    pub frame_rate: u32,
    /// Parameter ramp time constant in milliseconds
    pub smoothing_ms: f32,
    /// Position drift that triggers a PositionChanged event
    pub position_epsilon_ms: f64,
    /// Level change that triggers a LevelChanged event
    pub level_epsilon: f32,
    /// Recording duration tick in milliseconds
    pub capture_tick_ms: u64,
    /// Where exported recordings are written
    pub recording_dir: PathBuf,
    /// Capture encodings in order of preference
    pub recording_encodings: Vec<String>,
    /// Margin after a voice's release before it is disposed
    pub voice_settle_ms: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            frame_rate: 60,
            smoothing_ms: 15.0,
            position_epsilon_ms: 10.0,
            level_epsilon: 0.01,
            capture_tick_ms: 100,
            recording_dir: Self::default_recording_dir(),
            recording_encodings: vec![
                "wav-f32".to_string(),
                "wav-pcm24".to_string(),
                "wav-pcm16".to_string(),
            ],
            voice_settle_ms: 50.0,
        }
    }
}

impl EngineConfig {
    /// Load config from the default location
    ///
    /// Returns default config if the file doesn't exist or can't be read.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                debug!("Using default engine config ({}): {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())?;
        Ok(())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("twindeck")
            .join("engine.conf")
    }

    fn default_recording_dir() -> PathBuf {
        dirs::audio_dir()
            .or_else(dirs::data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("twindeck")
    }

    /// Ramp time constant in seconds
    pub fn smoothing_secs(&self) -> f32 {
        self.smoothing_ms / 1000.0
    }

    pub fn position_epsilon_secs(&self) -> f64 {
        self.position_epsilon_ms / 1000.0
    }

    pub fn voice_settle_secs(&self) -> f32 {
        self.voice_settle_ms / 1000.0
    }

    pub fn capture_tick(&self) -> Duration {
        Duration::from_millis(self.capture_tick_ms)
    }

    /// Interval between reconciliation ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate.max(1) as f64)
    }

    /// Parse config from simple key=value format
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if let Err(e) = config.set(key.trim(), value.trim()) {
                warn!("{}, keeping default", e);
            }
        }

        config
    }

    /// Set one key from its string value
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "sample_rate" => self.sample_rate = positive(key, value)?,
            "frame_rate" => self.frame_rate = positive(key, value)?,
            "smoothing_ms" => self.smoothing_ms = non_negative(key, value)?,
            "position_epsilon_ms" => self.position_epsilon_ms = non_negative(key, value)?,
            "level_epsilon" => self.level_epsilon = non_negative(key, value)?,
            "capture_tick_ms" => self.capture_tick_ms = positive(key, value)?,
            "voice_settle_ms" => self.voice_settle_ms = non_negative(key, value)?,
            "recording_dir" => {
                if value.is_empty() {
                    return Err(invalid(key, value));
                }
                self.recording_dir = PathBuf::from(value);
            }
            "recording_encodings" => {
                let list: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if list.is_empty() {
                    return Err(invalid(key, value));
                }
                self.recording_encodings = list;
            }
            _ => {} // Ignore unknown keys
        }
        Ok(())
    }

    /// Serialize config to simple key=value format
    pub fn serialize(&self) -> String {
        let lines = [
            "# TwinDeck engine configuration".to_string(),
            format!("sample_rate={}", self.sample_rate),
            format!("frame_rate={}", self.frame_rate),
            format!("smoothing_ms={}", self.smoothing_ms),
            format!("position_epsilon_ms={}", self.position_epsilon_ms),
            format!("level_epsilon={}", self.level_epsilon),
            format!("capture_tick_ms={}", self.capture_tick_ms),
            format!("recording_dir={}", self.recording_dir.display()),
            format!("recording_encodings={}", self.recording_encodings.join(",")),
            format!("voice_settle_ms={}", self.voice_settle_ms),
        ];
        lines.join("\n")
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn positive<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match value.parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(invalid(key, value)),
    }
}

fn non_negative<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    // NaN fails the comparison
    match value.parse::<T>() {
        Ok(v) if v >= T::default() => Ok(v),
        _ => Err(invalid(key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(EngineConfig::parse(""), EngineConfig::default());
    }

    #[test]
    fn test_parse_values() {
        let content = "sample_rate=44100\nframe_rate=30\nsmoothing_ms=20\nrecording_dir=/tmp/rec";
        let config = EngineConfig::parse(content);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.frame_rate, 30);
        assert_eq!(config.smoothing_ms, 20.0);
        assert_eq!(config.recording_dir, PathBuf::from("/tmp/rec"));
    }

    #[test]
    fn test_parse_with_comments_and_unknown_keys() {
        let content = "# Comment\ncolour=blue\nlevel_epsilon=0.05\n# Another comment";
        let config = EngineConfig::parse(content);
        assert_eq!(config.level_epsilon, 0.05);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let content = "sample_rate=fast\nframe_rate=0\nsmoothing_ms=-3\nrecording_encodings= , ";
        let config = EngineConfig::parse(content);
        let defaults = EngineConfig::default();
        assert_eq!(config.sample_rate, defaults.sample_rate);
        assert_eq!(config.frame_rate, defaults.frame_rate);
        assert_eq!(config.smoothing_ms, defaults.smoothing_ms);
        assert_eq!(config.recording_encodings, defaults.recording_encodings);
    }

    #[test]
    fn test_set_reports_invalid_value() {
        let mut config = EngineConfig::default();
        let err = config.set("capture_tick_ms", "soon").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "capture_tick_ms"));
    }

    #[test]
    fn test_encoding_list() {
        let config = EngineConfig::parse("recording_encodings=wav-pcm24, wav-pcm16");
        assert_eq!(config.recording_encodings, vec!["wav-pcm24", "wav-pcm16"]);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut config = EngineConfig::default();
        config.sample_rate = 96000;
        config.position_epsilon_ms = 5.0;
        config.recording_dir = PathBuf::from("/test/path");
        assert_eq!(EngineConfig::parse(&config.serialize()), config);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("twindeck-config-{}", std::process::id()))
            .join("engine.conf");
        let mut config = EngineConfig::default();
        config.voice_settle_ms = 80.0;
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.voice_settle_ms, 80.0);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_derived_durations() {
        let config = EngineConfig::default();
        assert!((config.smoothing_secs() - 0.015).abs() < 1e-6);
        assert_eq!(config.capture_tick(), Duration::from_millis(100));
        assert!((config.position_epsilon_secs() - 0.01).abs() < 1e-12);
    }
}
