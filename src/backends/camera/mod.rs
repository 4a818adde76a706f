// SPDX-License-Identifier: GPL-3.0-only
// Camera capture pipeline over a callback-driven camera subsystem

//! Camera backend abstraction and capture pipeline
//!
//! The operating system camera subsystem is modelled by three traits:
//! [`CameraSystem`] (discovery and opening), [`CameraDevice`] (an opened
//! device) and [`CaptureSession`] (a configured stream). Opening a device and
//! configuring a session complete asynchronously through callbacks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │   CLI / FrameSink    │
//! └──────────┬───────────┘
//!            │ start / stop
//!            ▼
//! ┌──────────────────────┐  callbacks   ┌──────────────────────┐
//! │  CaptureController   │◄─────────────│  CameraSystem Trait  │
//! │  (lifecycle, events) │─────────────►│  virtual | v4l2      │
//! └──────────┬───────────┘  open/config └──────────┬───────────┘
//!            │ SessionController::engage           │ frames
//!            ▼                                     ▼
//! ┌──────────────────────┐    wake      ┌──────────────────────┐
//! │  frame thread        │◄─────────────│  ImageReader (1 slot)│
//! │  FrameDelivery       │──acquire────►│                      │
//! └──────────┬───────────┘              └──────────────────────┘
//!            ▼
//!       FrameSink::on_frame
//! ```

pub mod controller;
pub mod delivery;
pub mod format_selector;
pub mod frame_loop;
pub mod image_reader;
pub mod orientation;
pub mod session;
pub mod types;
#[cfg(feature = "v4l2")]
pub mod v4l2;
pub mod virtual_camera;

pub use controller::{
    CaptureController, CaptureFailure, CaptureStatus, ControllerSettings, ErrorKind,
    LifecycleState, StartError,
};
pub use delivery::{FrameSink, FrameStats};
pub use image_reader::{FrameError, Image, ImageReader, OutputTarget, ReaderCounts};
pub use orientation::{DisplayRotation, ImageRotation};
pub use types::*;

use crate::config::Config;
use std::sync::Arc;
use tracing::info;

/// Events reported for a device after an open request
pub enum DeviceEvent {
    /// The device is open and exclusively owned by the receiver
    Opened(Box<dyn CameraDevice>),
    /// The device went away (unplugged or taken by another client)
    Disconnected,
    /// The device failed with an error code
    Error(DeviceErrorCode),
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::Disconnected => write!(f, "Disconnected"),
            DeviceEvent::Error(code) => write!(f, "Error({})", code),
        }
    }
}

/// Events reported for a capture session request
pub enum SessionEvent {
    /// The session is configured and ready for requests
    Configured(Box<dyn CaptureSession>),
    /// The requested output configuration could not be set up
    ConfigureFailed,
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Configured(_) => write!(f, "Configured"),
            SessionEvent::ConfigureFailed => write!(f, "ConfigureFailed"),
        }
    }
}

/// Receiver of device state callbacks
///
/// A backend keeps the callback for the lifetime of the device and may
/// invoke it from any thread.
#[derive(Clone)]
pub struct DeviceCallback(Arc<dyn Fn(DeviceEvent) + Send + Sync>);

impl DeviceCallback {
    pub fn new(f: impl Fn(DeviceEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn notify(&self, event: DeviceEvent) {
        (self.0)(event);
    }
}

/// Receiver of session state callbacks
#[derive(Clone)]
pub struct SessionCallback(Arc<dyn Fn(SessionEvent) + Send + Sync>);

impl SessionCallback {
    pub fn new(f: impl Fn(SessionEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn notify(&self, event: SessionEvent) {
        (self.0)(event);
    }
}

/// A capture request built from a template
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    template: RequestTemplate,
    targets: Vec<OutputTarget>,
}

impl CaptureRequest {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
        }
    }

    /// Add an output the request streams into
    pub fn add_target(&mut self, target: OutputTarget) {
        self.targets.push(target);
    }

    pub fn template(&self) -> RequestTemplate {
        self.template
    }

    pub fn targets(&self) -> &[OutputTarget] {
        &self.targets
    }
}

/// Operating system camera subsystem
pub trait CameraSystem: Send + Sync {
    /// Backend type identifier
    fn backend_type(&self) -> CameraBackendType;

    /// Whether the process may use the camera
    fn has_camera_permission(&self) -> bool;

    /// Identifiers of all cameras, in subsystem order
    fn camera_ids(&self) -> BackendResult<Vec<String>>;

    /// Static properties of one camera
    fn characteristics(&self, camera_id: &str) -> BackendResult<CameraCharacteristics>;

    /// Current display rotation
    fn display_rotation(&self) -> DisplayRotation;

    /// Request that a camera is opened
    ///
    /// Returns once the request is accepted; the outcome arrives later on
    /// `callback`. An `Err` means the request was refused outright and no
    /// callback will follow.
    fn open_camera(&self, camera_id: &str, callback: DeviceCallback) -> BackendResult<()>;
}

/// An opened camera device
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Request a capture session streaming into `outputs`
    ///
    /// The outcome arrives on `callback`. An `Err` means no callback will follow.
    fn create_capture_session(
        &mut self,
        outputs: Vec<OutputTarget>,
        callback: SessionCallback,
    ) -> BackendResult<()>;

    /// Build a request pre-populated from `template`
    fn create_capture_request(&self, template: RequestTemplate) -> BackendResult<CaptureRequest>;

    /// Close the device; idempotent
    fn close(&mut self);
}

/// A configured capture session
pub trait CaptureSession: Send {
    /// Submit a request that repeats until the session is closed
    fn set_repeating_request(&mut self, request: CaptureRequest) -> BackendResult<()>;

    /// Close the session; idempotent
    fn close(&mut self);
}

/// Create the camera system for a backend type
pub fn create_system(
    backend: CameraBackendType,
    config: &Config,
) -> BackendResult<Arc<dyn CameraSystem>> {
    info!(backend = %backend, "Creating camera system");

    match backend {
        CameraBackendType::Virtual => Ok(Arc::new(virtual_camera::VirtualCameraSystem::demo(
            config.display_rotation,
            config.virtual_fps,
        ))),
        #[cfg(feature = "v4l2")]
        CameraBackendType::V4l2 => Ok(Arc::new(v4l2::V4l2CameraSystem::new(
            v4l2::V4l2Settings::from_config(config),
        ))),
        #[cfg(not(feature = "v4l2"))]
        CameraBackendType::V4l2 => Err(BackendError::NotAvailable(
            "built without the v4l2 feature".to_string(),
        )),
    }
}
