// SPDX-License-Identifier: GPL-3.0-only

//! Persistent settings
//!
//! Stored as JSON at `$XDG_CONFIG_HOME/rtp-camera/config.json`. Missing
//! fields take their defaults, and an unreadable file falls back to the
//! defaults with a warning.

use crate::backends::camera::types::CapturePreset;
use crate::constants::{encoder, sink};
use crate::errors::{AppError, AppResult};
use crate::media::encoders::session::EncoderSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "rtp-camera";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera device path; `None` uses the system default
    pub device: Option<String>,
    /// Encoder target bitrate
    pub bitrate_kbps: u32,
    /// Frames between key frames
    pub keyframe_interval: u32,
    /// Hardware encoder element to use instead of the highest priority one
    pub encoder: Option<String>,
    /// Encoded units buffered for a slow consumer before dropping
    pub sink_capacity: usize,
    /// Produce preview images
    pub preview: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            bitrate_kbps: encoder::DEFAULT_BITRATE_KBPS,
            keyframe_interval: encoder::DEFAULT_KEYFRAME_INTERVAL,
            encoder: None,
            sink_capacity: sink::CHANNEL_BUFFER_SIZE,
            preview: false,
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from the default location, writing defaults on first use
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            warn!("No config directory, using defaults");
            return Self::default();
        };

        if !path.exists() {
            let config = Self::default();
            match config.save_to(&path) {
                Ok(()) => info!(path = %path.display(), "Created default config"),
                Err(e) => warn!(error = %e, "Failed to write default config"),
            }
            return config;
        }

        Self::load_from(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        debug!(path = %path.display(), ?config, "Loaded config");
        Ok(config)
    }

    pub fn save(&self) -> AppResult<()> {
        let path = Self::path().ok_or_else(|| AppError::Config("no config directory".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn validate(&self) -> AppResult<()> {
        if self.bitrate_kbps == 0 {
            return Err(AppError::Config("bitrate_kbps must be positive".into()));
        }
        if self.keyframe_interval == 0 {
            return Err(AppError::Config("keyframe_interval must be positive".into()));
        }
        Ok(())
    }

    /// Encoder settings for the capture preset
    pub fn encoder_settings(&self, preset: &CapturePreset) -> EncoderSettings {
        EncoderSettings {
            bitrate_kbps: self.bitrate_kbps,
            keyframe_interval: self.keyframe_interval,
            encoder_override: self.encoder.clone(),
            ..EncoderSettings::for_preset(preset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("rtp-camera-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path(CONFIG_FILE);
        let config = Config {
            device: Some("/dev/video2".into()),
            encoder: Some("vah264enc".into()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_zero_bitrate_is_rejected() {
        let path = temp_path(CONFIG_FILE);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"bitrate_kbps": 0}"#).unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(AppError::Config(_))
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_encoder_settings_follow_preset() {
        let config = Config {
            bitrate_kbps: 4000,
            ..Config::default()
        };
        let settings = config.encoder_settings(&CapturePreset::default());
        assert_eq!((settings.width, settings.height), (1280, 720));
        assert_eq!(settings.bitrate_kbps, 4000);
        assert_eq!(settings.expected_frame_rate, 30);
    }
}
