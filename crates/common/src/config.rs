//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Recording pipeline settings.
    pub recording: RecordingDefaults,

    /// Post-processing settings for finished recordings.
    pub composition: CompositionDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Recording pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Directory holding the fixed temporary container.
    pub temp_dir: PathBuf,

    /// File name of the temporary container, overwritten per recording.
    pub temp_file_name: String,

    /// Directory receiving composed recordings.
    pub output_dir: PathBuf,

    /// Container extension for composed recordings.
    pub container_extension: String,

    /// Video codec of the recorded track.
    pub video_codec: String,

    /// Pixel format of the pool buffers handed to the video track.
    pub pixel_format: String,

    /// Constant audio encoder bitrate in bits per second.
    pub audio_bitrate: u32,

    /// Number of render buffers the frame pool may allocate.
    pub pool_capacity: usize,

    /// Bound of each track writer's internal queue in bytes.
    pub writer_queue_bytes: u64,
}

/// Parameters of the post-processing compositor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionDefaults {
    /// Output frame rate.
    pub frame_rate: u32,

    /// Encoder preset; fixed quality for every job.
    pub preset: String,

    /// Constant rate factor paired with the preset.
    pub crf: u32,

    /// Audio bitrate of the composed file (kbps).
    pub audio_bitrate_kbps: u32,

    /// Clockwise rotation applied to the video track (0, 90, 180, 270).
    pub rotation_degrees: u32,

    /// Mirror the video track horizontally.
    pub mirror: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "framecap=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            temp_file_name: "recording.mov".to_string(),
            output_dir: std::env::temp_dir(),
            container_extension: "mov".to_string(),
            video_codec: "h264".to_string(),
            pixel_format: "BGRA".to_string(),
            audio_bitrate: 64_000,
            pool_capacity: 8,
            writer_queue_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for CompositionDefaults {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            preset: "medium".to_string(),
            crf: 23,
            audio_bitrate_kbps: 64,
            rotation_degrees: 0,
            mirror: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingDefaults {
    /// The fixed, well-known temporary container path.
    pub fn temp_path(&self) -> PathBuf {
        self.temp_dir.join(&self.temp_file_name)
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("framecap").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recording_constants() {
        let config = AppConfig::default();
        assert_eq!(config.recording.audio_bitrate, 64_000);
        assert_eq!(config.recording.temp_file_name, "recording.mov");
        assert_eq!(config.composition.frame_rate, 30);
        assert_eq!(config.composition.preset, "medium");
    }

    #[test]
    fn partial_json_fills_missing_fields_with_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "recording": { "pool_capacity": 3 } }"#).unwrap();
        assert_eq!(config.recording.pool_capacity, 3);
        assert_eq!(config.recording.audio_bitrate, 64_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn temp_path_joins_dir_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = RecordingDefaults {
            temp_dir: dir.path().to_path_buf(),
            ..RecordingDefaults::default()
        };
        assert_eq!(defaults.temp_path(), dir.path().join("recording.mov"));
    }
}
