// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON at `<config dir>/camera-capture/config.json`. Missing
//! fields fall back to their defaults, so older files keep loading.

use crate::backends::camera::orientation::DisplayRotation;
use crate::backends::camera::types::{CameraBackendType, ImageFormat, LensFacing};
use crate::constants::{app, pipeline, timing};
use crate::storage::{self, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// No config directory could be determined
    NoConfigDir,
    /// Reading or writing the file failed
    Io(std::io::Error),
    /// The file is not valid configuration JSON
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(f, "Could not determine config directory"),
            ConfigError::Io(e) => write!(f, "Config I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Invalid config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera backend to use
    pub backend: CameraBackendType,
    /// Pixel format frames are delivered in
    pub required_format: ImageFormat,
    /// Name of the frame-processing thread
    pub frame_thread_name: String,
    /// Location of the scanned URL list (default: data dir)
    pub codes_path: Option<PathBuf>,
    /// Tracing filter used when RUST_LOG is unset
    pub log_filter: String,
    /// Lens facing reported for V4L2 devices
    pub v4l2_lens_facing: LensFacing,
    /// Sensor mounting angle reported for V4L2 devices, in degrees
    pub v4l2_sensor_orientation: i32,
    /// Display rotation used for orientation correction
    pub display_rotation: DisplayRotation,
    /// Frame rate of the virtual camera test pattern (0 disables it)
    pub virtual_fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: CameraBackendType::default(),
            required_format: ImageFormat::Yuv420_888,
            frame_thread_name: pipeline::FRAME_THREAD_NAME.to_string(),
            codes_path: None,
            log_filter: pipeline::DEFAULT_LOG_FILTER.to_string(),
            v4l2_lens_facing: LensFacing::Back,
            v4l2_sensor_orientation: 0,
            display_rotation: DisplayRotation::Rotation0,
            virtual_fps: timing::VIRTUAL_DEFAULT_FPS,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(app::DIR_NAME).join(app::CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, or defaults if no file exists
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load from `path`, or defaults if the file does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_json::from_str(&contents)?;
                debug!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// Save to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Effective location of the scanned URL list
    pub fn codes_path(&self) -> StorageResult<PathBuf> {
        match &self.codes_path {
            Some(path) => Ok(path.clone()),
            None => storage::default_codes_path(),
        }
    }
}
