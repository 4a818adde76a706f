// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera-capture application
//!
//! Library modules return their own error enums; the CLI folds them into
//! [`AppError`].

use crate::backends::camera::controller::{CaptureFailure, StartError};
use crate::backends::camera::types::BackendError;
use crate::config::ConfigError;
use crate::pipelines::convert::ConvertError;
use crate::storage::StorageError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug)]
pub enum AppError {
    /// Camera subsystem errors
    Backend(BackendError),
    /// Capture could not be started
    Start(StartError),
    /// Capture failed after starting
    Capture(CaptureFailure),
    /// Configuration errors
    Config(ConfigError),
    /// Persisted list errors
    Storage(StorageError),
    /// Frame conversion errors
    Convert(ConvertError),
    /// Image encoding or saving failed
    Image(image::ImageError),
    /// Nothing arrived before the deadline
    Timeout(String),
    /// Generic error with message
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Backend(e) => write!(f, "Camera error: {}", e),
            AppError::Start(e) => write!(f, "Cannot start capture: {}", e),
            AppError::Capture(e) => write!(f, "Capture failed: {}", e),
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Storage(e) => write!(f, "Storage error: {}", e),
            AppError::Convert(e) => write!(f, "Conversion error: {}", e),
            AppError::Image(e) => write!(f, "Image error: {}", e),
            AppError::Timeout(what) => write!(f, "Timed out waiting for {}", what),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Backend(err)
    }
}

impl From<StartError> for AppError {
    fn from(err: StartError) -> Self {
        AppError::Start(err)
    }
}

impl From<CaptureFailure> for AppError {
    fn from(err: CaptureFailure) -> Self {
        AppError::Capture(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err)
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        AppError::Convert(err)
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Image(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(StorageError::Io(err))
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
