// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use serde::{Deserialize, Serialize};

/// Camera backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraBackendType {
    /// In-process simulated camera subsystem
    #[default]
    Virtual,
    /// Linux V4L2 devices
    V4l2,
}

impl std::fmt::Display for CameraBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraBackendType::Virtual => write!(f, "virtual"),
            CameraBackendType::V4l2 => write!(f, "v4l2"),
        }
    }
}

impl std::str::FromStr for CameraBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "virtual" => Ok(CameraBackendType::Virtual),
            "v4l2" => Ok(CameraBackendType::V4l2),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Image format code advertised by the camera subsystem
///
/// Codes follow the platform image format constants, so a capability list
/// can be reported verbatim by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ImageFormat {
    /// Planar/semi-planar YUV 4:2:0 with three planes (code 35)
    #[default]
    Yuv420_888,
    /// NV21 semi-planar YUV (code 17)
    Nv21,
    /// Packed YUYV 4:2:2 (code 20)
    Yuyv,
    /// Compressed JPEG (code 256)
    Jpeg,
    /// Any other code reported by the device
    Other(i32),
}

impl ImageFormat {
    /// Build from a raw format code
    pub fn from_code(code: i32) -> Self {
        match code {
            35 => ImageFormat::Yuv420_888,
            17 => ImageFormat::Nv21,
            20 => ImageFormat::Yuyv,
            256 => ImageFormat::Jpeg,
            other => ImageFormat::Other(other),
        }
    }

    /// Raw format code
    pub fn code(&self) -> i32 {
        match self {
            ImageFormat::Yuv420_888 => 35,
            ImageFormat::Nv21 => 17,
            ImageFormat::Yuyv => 20,
            ImageFormat::Jpeg => 256,
            ImageFormat::Other(code) => *code,
        }
    }

    /// Number of planes an image of this format carries
    pub fn plane_count(&self) -> usize {
        match self {
            ImageFormat::Yuv420_888 => crate::constants::pipeline::YUV_PLANES,
            ImageFormat::Nv21 => 2,
            ImageFormat::Yuyv | ImageFormat::Jpeg | ImageFormat::Other(_) => 1,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Yuv420_888 => write!(f, "YUV_420_888"),
            ImageFormat::Nv21 => write!(f, "NV21"),
            ImageFormat::Yuyv => write!(f, "YUYV"),
            ImageFormat::Jpeg => write!(f, "JPEG"),
            ImageFormat::Other(code) => write!(f, "format({})", code),
        }
    }
}

/// One advertised output configuration of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamConfiguration {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl StreamConfiguration {
    pub fn new(format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }
}

/// Output stream format chosen for a capture cycle
///
/// Width and height are always non-zero; only the format selector creates
/// values of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamFormat {
    pixel_format: ImageFormat,
    width: u32,
    height: u32,
}

impl StreamFormat {
    pub(crate) fn new(pixel_format: ImageFormat, width: u32, height: u32) -> Self {
        debug_assert!(width > 0 && height > 0);
        Self {
            pixel_format,
            width,
            height,
        }
    }

    pub fn pixel_format(&self) -> ImageFormat {
        self.pixel_format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.pixel_format)
    }
}

/// Physical direction a camera lens faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LensFacing {
    Front,
    /// Mounted on the side opposite the display
    #[default]
    Back,
    External,
}

impl std::fmt::Display for LensFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensFacing::Front => write!(f, "front"),
            LensFacing::Back => write!(f, "back"),
            LensFacing::External => write!(f, "external"),
        }
    }
}

/// Static properties of a camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCharacteristics {
    pub lens_facing: LensFacing,
    /// Clockwise angle the sensor is mounted at, in degrees
    pub sensor_orientation: i32,
    /// Output configurations in device-reported order
    pub stream_configurations: Vec<StreamConfiguration>,
}

impl CameraCharacteristics {
    /// Output configurations advertised for one format, in device order
    pub fn output_sizes(&self, format: ImageFormat) -> Vec<(u32, u32)> {
        self.stream_configurations
            .iter()
            .filter(|c| c.format == format)
            .map(|c| (c.width, c.height))
            .collect()
    }
}

/// Capture request template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestTemplate {
    /// Continuous preview with automatic exposure and focus
    #[default]
    Preview,
}

impl RequestTemplate {
    /// Platform template code
    pub fn code(&self) -> i32 {
        match self {
            RequestTemplate::Preview => 1,
        }
    }
}

/// Error code reported by a camera device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceErrorCode(pub i32);

impl DeviceErrorCode {
    /// Device already opened by a higher-priority client
    pub const CAMERA_IN_USE: Self = Self(1);
    /// Too many devices open system-wide
    pub const MAX_CAMERAS_IN_USE: Self = Self(2);
    /// Disabled by device policy
    pub const CAMERA_DISABLED: Self = Self(3);
    /// Fatal device error
    pub const CAMERA_DEVICE: Self = Self(4);
    /// Fatal camera service error
    pub const CAMERA_SERVICE: Self = Self(5);

    pub fn code(&self) -> i32 {
        self.0
    }

    fn describe(&self) -> &'static str {
        match self.0 {
            1 => "camera in use",
            2 => "max cameras in use",
            3 => "camera disabled",
            4 => "camera device error",
            5 => "camera service error",
            _ => "unknown error",
        }
    }
}

impl std::fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.describe(), self.0)
    }
}

/// A frame copied out of the camera buffer, ready for a sink
///
/// Strides are row byte widths and may exceed `width` when rows are padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFrame {
    pub plane_y: Vec<u8>,
    pub stride_y: u32,
    pub plane_u: Vec<u8>,
    pub stride_u: u32,
    pub plane_v: Vec<u8>,
    pub stride_v: u32,
    /// Clockwise rotation that makes the image upright, in `[0, 360)`
    pub rotation_degrees: u32,
    pub width: u32,
    pub height: u32,
}

impl ExtractedFrame {
    /// Luma sample at (x, y), honouring the row stride
    pub fn luma(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.stride_y as usize + x as usize;
        self.plane_y.get(index).copied()
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for camera subsystem calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Device reported an error code
    Device(DeviceErrorCode),
    /// Object was already closed
    Closed,
    /// Request could not be built or submitted
    InvalidRequest(String),
    /// General I/O error
    IoError(String),
}

impl BackendError {
    /// Device error code to surface to callers
    pub fn error_code(&self) -> DeviceErrorCode {
        match self {
            BackendError::Device(code) => *code,
            BackendError::NotAvailable(_) => DeviceErrorCode::CAMERA_SERVICE,
            BackendError::DeviceNotFound(_)
            | BackendError::Closed
            | BackendError::InvalidRequest(_)
            | BackendError::IoError(_) => DeviceErrorCode::CAMERA_DEVICE,
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::Device(code) => write!(f, "Device error: {}", code),
            BackendError::Closed => write!(f, "Already closed"),
            BackendError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format_codes() {
        for format in [
            ImageFormat::Yuv420_888,
            ImageFormat::Nv21,
            ImageFormat::Yuyv,
            ImageFormat::Jpeg,
            ImageFormat::Other(99),
        ] {
            assert_eq!(ImageFormat::from_code(format.code()), format);
        }
        assert_eq!(ImageFormat::Yuv420_888.code(), 35);
        assert_eq!(ImageFormat::Yuv420_888.plane_count(), 3);
    }

    #[test]
    fn test_output_sizes_keep_device_order() {
        let characteristics = CameraCharacteristics {
            lens_facing: LensFacing::Back,
            sensor_orientation: 90,
            stream_configurations: vec![
                StreamConfiguration::new(ImageFormat::Yuv420_888, 640, 480),
                StreamConfiguration::new(ImageFormat::Jpeg, 160, 120),
                StreamConfiguration::new(ImageFormat::Yuv420_888, 320, 240),
            ],
        };

        assert_eq!(
            characteristics.output_sizes(ImageFormat::Yuv420_888),
            vec![(640, 480), (320, 240)]
        );
    }

    #[test]
    fn test_luma_uses_stride() {
        let frame = ExtractedFrame {
            plane_y: vec![1, 2, 0, 0, 3, 4, 0, 0],
            stride_y: 4,
            plane_u: vec![],
            stride_u: 2,
            plane_v: vec![],
            stride_v: 2,
            rotation_degrees: 0,
            width: 2,
            height: 2,
        };

        assert_eq!(frame.luma(1, 1), Some(4));
        assert_eq!(frame.luma(2, 0), None);
    }

    #[test]
    fn test_backend_type_parse() {
        assert_eq!("V4L2".parse::<CameraBackendType>(), Ok(CameraBackendType::V4l2));
        assert!("pipewire".parse::<CameraBackendType>().is_err());
    }
}
