// SPDX-License-Identifier: GPL-3.0-only

//! Camera Capture - asynchronous single-camera frame pipeline
//!
//! Opens the back-facing camera, selects the smallest YUV 4:2:0 stream,
//! drives a repeating preview request and hands each frame to a
//! [`FrameSink`](pipelines::FrameSink) on a dedicated thread.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera subsystem abstraction, capture controller and backends
//! - [`pipelines`]: Frame sinks, QR scanning and RGB conversion
//! - [`config`]: User configuration handling
//! - [`storage`]: Persisted list of scanned URLs
//! - [`errors`]: Application-level error type
//!
//! # Example
//!
//! ```no_run
//! use camera_capture::backends::camera::{CaptureController, ControllerSettings, create_system};
//! use camera_capture::pipelines::ChannelSink;
//! use camera_capture::{CameraBackendType, Config};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let system = create_system(CameraBackendType::Virtual, &config)?;
//! let controller = CaptureController::new(system, ControllerSettings::from_config(&config));
//! let (sink, mut frames) = ChannelSink::new(4);
//! controller.start(Arc::new(sink))?;
//! if let Some(frame) = frames.recv().await {
//!     println!("{}x{} rotated {}°", frame.width, frame.height, frame.rotation_degrees);
//! }
//! controller.stop();
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{
    CameraBackendType, CaptureController, CaptureFailure, CaptureStatus, ExtractedFrame,
    LifecycleState, StartError,
};
pub use config::Config;
pub use errors::{AppError, AppResult};
