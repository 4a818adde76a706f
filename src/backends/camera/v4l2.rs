// SPDX-License-Identifier: GPL-3.0-only

//! Linux V4L2 camera backend
//!
//! Exposes `/dev/video*` capture nodes through the callback-driven camera
//! system traits. Open and session configuration run on short-lived worker
//! threads; an accepted repeating request starts a capture thread that
//! memory-map streams planar YUV 4:2:0 (`YU12`) and offers each buffer to the
//! session's output target.
//!
//! V4L2 does not report where a sensor is mounted or which way it faces, so
//! both come from the configuration. The node is opened once; the device,
//! its session and the capture thread share that handle, and closing the
//! device releases it.

use super::image_reader::{ImageData, OutputTarget, PlaneData};
use super::orientation::DisplayRotation;
use super::types::*;
use super::{
    CameraDevice, CameraSystem, CaptureRequest, CaptureSession, DeviceCallback, DeviceEvent,
    SessionCallback, SessionEvent,
};
use crate::config::Config;
use crate::constants::v4l2 as v4l2_consts;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// Consecutive dequeue failures tolerated before the device is reported broken
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Sizes offered for drivers that report stepwise frame sizes
const STEPWISE_SIZES: [(u32, u32); 3] = [(320, 240), (640, 480), (1280, 720)];

/// Settings V4L2 cannot discover from the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V4l2Settings {
    pub lens_facing: LensFacing,
    pub sensor_orientation: i32,
    pub display_rotation: DisplayRotation,
}

impl V4l2Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lens_facing: config.v4l2_lens_facing,
            sensor_orientation: config.v4l2_sensor_orientation,
            display_rotation: config.display_rotation,
        }
    }
}

impl Default for V4l2Settings {
    fn default() -> Self {
        Self {
            lens_facing: LensFacing::Back,
            sensor_orientation: 0,
            display_rotation: DisplayRotation::Rotation0,
        }
    }
}

/// Map a V4L2 fourcc to an image format
fn image_format(fourcc: FourCC) -> ImageFormat {
    match &fourcc.repr {
        b"YU12" => ImageFormat::Yuv420_888,
        b"NV21" => ImageFormat::Nv21,
        b"YUYV" => ImageFormat::Yuyv,
        b"MJPG" | b"JPEG" => ImageFormat::Jpeg,
        other => ImageFormat::Other(i32::from_le_bytes(*other)),
    }
}

/// Map an I/O error from the driver to a device error code
fn error_code(err: &io::Error) -> DeviceErrorCode {
    match err.kind() {
        io::ErrorKind::PermissionDenied => DeviceErrorCode::CAMERA_DISABLED,
        _ if err.raw_os_error() == Some(libc::EBUSY) => DeviceErrorCode::CAMERA_IN_USE,
        _ => DeviceErrorCode::CAMERA_DEVICE,
    }
}

/// The device node vanished
fn is_disconnect(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENODEV)
}

/// Capture device nodes sorted by index
fn device_nodes() -> Vec<PathBuf> {
    let mut nodes: Vec<(u32, PathBuf)> = std::fs::read_dir("/dev")
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let index = path
                .to_str()?
                .strip_prefix(v4l2_consts::DEVICE_PREFIX)?
                .parse::<u32>()
                .ok()?;
            (index <= v4l2_consts::MAX_DEVICE_INDEX).then_some((index, path))
        })
        .collect();
    nodes.sort_by_key(|(index, _)| *index);
    nodes.into_iter().map(|(_, path)| path).collect()
}

/// Output configurations advertised by a device
fn stream_configurations(dev: &Device) -> io::Result<Vec<StreamConfiguration>> {
    let mut configurations = Vec::new();

    for description in dev.enum_formats()? {
        let format = image_format(description.fourcc);
        let Ok(sizes) = dev.enum_framesizes(description.fourcc) else {
            continue;
        };

        for size in sizes {
            match size.size {
                v4l::framesize::FrameSizeEnum::Discrete(discrete) => {
                    configurations.push(StreamConfiguration::new(
                        format,
                        discrete.width,
                        discrete.height,
                    ));
                }
                v4l::framesize::FrameSizeEnum::Stepwise(step) => {
                    for (w, h) in STEPWISE_SIZES {
                        if (step.min_width..=step.max_width).contains(&w)
                            && (step.min_height..=step.max_height).contains(&h)
                        {
                            configurations.push(StreamConfiguration::new(format, w, h));
                        }
                    }
                }
            }
        }
    }

    Ok(configurations)
}

/// Camera system backed by V4L2 device nodes
pub struct V4l2CameraSystem {
    settings: V4l2Settings,
}

impl V4l2CameraSystem {
    pub fn new(settings: V4l2Settings) -> Self {
        Self { settings }
    }
}

impl CameraSystem for V4l2CameraSystem {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::V4l2
    }

    fn has_camera_permission(&self) -> bool {
        let nodes = device_nodes();
        if nodes.is_empty() {
            return true;
        }
        nodes.iter().any(|path| {
            std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .is_ok()
        })
    }

    fn camera_ids(&self) -> BackendResult<Vec<String>> {
        let ids: Vec<String> = device_nodes()
            .into_iter()
            .filter(|path| {
                Device::with_path(path)
                    .and_then(|dev| dev.enum_formats())
                    .is_ok_and(|formats| !formats.is_empty())
            })
            .map(|path| path.to_string_lossy().into_owned())
            .collect();

        debug!(count = ids.len(), "Enumerated V4L2 capture devices");
        Ok(ids)
    }

    fn characteristics(&self, camera_id: &str) -> BackendResult<CameraCharacteristics> {
        let dev = Device::with_path(camera_id)
            .map_err(|e| BackendError::DeviceNotFound(format!("{}: {}", camera_id, e)))?;

        Ok(CameraCharacteristics {
            lens_facing: self.settings.lens_facing,
            sensor_orientation: self.settings.sensor_orientation,
            stream_configurations: stream_configurations(&dev)?,
        })
    }

    fn display_rotation(&self) -> DisplayRotation {
        self.settings.display_rotation
    }

    fn open_camera(&self, camera_id: &str, callback: DeviceCallback) -> BackendResult<()> {
        if !Path::new(camera_id).exists() {
            return Err(BackendError::DeviceNotFound(camera_id.to_string()));
        }

        let path = camera_id.to_string();
        info!(device = %path, "Opening V4L2 device");

        thread::Builder::new()
            .name("v4l2-open".to_string())
            .spawn(move || match Device::with_path(&path) {
                Ok(dev) => {
                    let name = dev
                        .query_caps()
                        .map(|caps| caps.card)
                        .unwrap_or_else(|_| path.clone());
                    debug!(device = %path, card = %name, "V4L2 device opened");

                    let device = V4l2Device {
                        handle: Arc::new(DeviceHandle::new(path, dev)),
                        callback: callback.clone(),
                    };
                    callback.notify(DeviceEvent::Opened(Box::new(device)));
                }
                Err(e) if is_disconnect(&e) => {
                    warn!(device = %path, error = %e, "V4L2 device vanished");
                    callback.notify(DeviceEvent::Disconnected);
                }
                Err(e) => {
                    error!(device = %path, error = %e, "Failed to open V4L2 device");
                    callback.notify(DeviceEvent::Error(error_code(&e)));
                }
            })?;

        Ok(())
    }
}

/// An open device node
///
/// Dropping the inner device closes the file descriptor once no stream
/// created from it is alive.
struct DeviceHandle<D = Device> {
    path: String,
    device: Mutex<Option<D>>,
    closed: AtomicBool,
}

impl<D> DeviceHandle<D> {
    fn new(path: String, device: D) -> Self {
        Self {
            path,
            device: Mutex::new(Some(device)),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `f` on the open device
    fn with_device<T>(&self, f: impl FnOnce(&D) -> io::Result<T>) -> io::Result<T> {
        let guard = self.device.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(device) => f(device),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is closed", self.path),
            )),
        }
    }

    /// Release the device; returns `false` if it was already closed
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let device = self.device.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(device);
        true
    }
}

/// Format the driver accepted during session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Negotiated {
    width: u32,
    height: u32,
    stride: u32,
}

struct V4l2Device {
    handle: Arc<DeviceHandle>,
    callback: DeviceCallback,
}

/// Negotiate planar YUV 4:2:0 at the requested size
fn negotiate(dev: &Device, format: StreamFormat) -> io::Result<Negotiated> {
    let requested = Format::new(
        format.width(),
        format.height(),
        FourCC::new(v4l2_consts::YUV420_FOURCC),
    );
    let actual = dev.set_format(&requested)?;

    if actual.fourcc != requested.fourcc
        || actual.width != requested.width
        || actual.height != requested.height
    {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!(
                "driver chose {}x{} {:?} instead of {}",
                actual.width, actual.height, actual.fourcc, format
            ),
        ));
    }
    Ok(Negotiated {
        width: actual.width,
        height: actual.height,
        stride: actual.stride,
    })
}

impl CameraDevice for V4l2Device {
    fn id(&self) -> &str {
        &self.handle.path
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<OutputTarget>,
        callback: SessionCallback,
    ) -> BackendResult<()> {
        if self.handle.is_closed() {
            return Err(BackendError::Closed);
        }
        let Some(format) = outputs.first().map(OutputTarget::format) else {
            return Err(BackendError::InvalidRequest("no outputs".to_string()));
        };

        let handle = Arc::clone(&self.handle);
        let device_callback = self.callback.clone();

        thread::Builder::new()
            .name("v4l2-configure".to_string())
            .spawn(move || {
                match handle.with_device(|dev| negotiate(dev, format)) {
                    Ok(negotiated) => {
                        info!(
                            device = %handle.path,
                            width = negotiated.width,
                            height = negotiated.height,
                            stride = negotiated.stride,
                            "V4L2 session configured"
                        );
                        let session = V4l2Session {
                            handle,
                            negotiated,
                            outputs,
                            device_callback,
                            stop: Arc::new(AtomicBool::new(false)),
                        };
                        callback.notify(SessionEvent::Configured(Box::new(session)));
                    }
                    Err(e) => {
                        warn!(device = %handle.path, error = %e, "V4L2 session configuration failed");
                        callback.notify(SessionEvent::ConfigureFailed);
                    }
                }
            })?;

        Ok(())
    }

    fn create_capture_request(&self, template: RequestTemplate) -> BackendResult<CaptureRequest> {
        if self.handle.is_closed() {
            return Err(BackendError::Closed);
        }
        Ok(CaptureRequest::new(template))
    }

    fn close(&mut self) {
        if self.handle.close() {
            debug!(device = %self.handle.path, "V4L2 device closed");
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.close();
    }
}

struct V4l2Session {
    handle: Arc<DeviceHandle>,
    negotiated: Negotiated,
    outputs: Vec<OutputTarget>,
    device_callback: DeviceCallback,
    stop: Arc<AtomicBool>,
}

impl CaptureSession for V4l2Session {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> BackendResult<()> {
        if self.stop.load(Ordering::SeqCst) || self.handle.is_closed() {
            return Err(BackendError::Closed);
        }
        let Some(target) = request.targets().first().cloned() else {
            return Err(BackendError::InvalidRequest("request has no target".to_string()));
        };
        if !self.outputs.iter().any(|o| o.same_surface(&target)) {
            return Err(BackendError::InvalidRequest(
                "target is not a session output".to_string(),
            ));
        }

        let capture = CaptureThread {
            handle: Arc::clone(&self.handle),
            negotiated: self.negotiated,
            target,
            device_callback: self.device_callback.clone(),
            stop: Arc::clone(&self.stop),
        };
        thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || capture.run())?;

        info!(device = %self.handle.path, template = request.template().code(), "V4L2 streaming started");
        Ok(())
    }

    fn close(&mut self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            debug!(device = %self.handle.path, "V4L2 session closed");
        }
    }
}

impl Drop for V4l2Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// State moved onto the capture thread
struct CaptureThread {
    handle: Arc<DeviceHandle>,
    negotiated: Negotiated,
    target: OutputTarget,
    device_callback: DeviceCallback,
    stop: Arc<AtomicBool>,
}

impl CaptureThread {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
            || self.handle.is_closed()
            || self.target.is_closed()
    }

    fn report(&self, err: &io::Error) {
        if self.should_stop() {
            return;
        }
        if is_disconnect(err) {
            self.device_callback.notify(DeviceEvent::Disconnected);
        } else {
            self.device_callback.notify(DeviceEvent::Error(error_code(err)));
        }
    }

    fn run(self) {
        let path = self.handle.path.clone();
        let negotiated = self.negotiated;

        // The stream keeps the descriptor alive on its own, so the lock is
        // only held while buffers are set up
        let mut stream = match self.handle.with_device(|dev| {
            MmapStream::with_buffers(dev, Type::VideoCapture, v4l2_consts::STREAM_BUFFERS)
        }) {
            Ok(stream) => stream,
            Err(e) => {
                error!(device = %path, error = %e, "Failed to create V4L2 stream");
                self.report(&e);
                return;
            }
        };

        info!(device = %path, stride = negotiated.stride, "V4L2 capture loop started");
        let mut consecutive_errors = 0;

        while !self.should_stop() {
            let (buf, meta) = match stream.next() {
                Ok(frame) => frame,
                Err(e) if is_disconnect(&e) => {
                    warn!(device = %path, error = %e, "V4L2 device disconnected");
                    self.report(&e);
                    break;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(device = %path, error = %e, consecutive_errors, "Failed to dequeue frame");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        self.report(&e);
                        break;
                    }
                    continue;
                }
            };
            consecutive_errors = 0;

            let timestamp_ns = (meta.timestamp.sec as u64)
                .saturating_mul(1_000_000_000)
                .saturating_add(meta.timestamp.usec as u64 * 1_000);

            match split_i420(
                buf,
                negotiated.width,
                negotiated.height,
                negotiated.stride,
                timestamp_ns,
            ) {
                Some(image) => {
                    self.target.offer(image);
                }
                None => warn!(
                    device = %path,
                    len = buf.len(),
                    "Short I420 buffer, frame skipped"
                ),
            }
        }

        info!(device = %path, "V4L2 capture loop exiting");
    }
}

/// Split a contiguous I420 buffer into Y, U and V planes
///
/// Chroma rows are half the luma stride, as V4L2 lays out planar formats.
fn split_i420(
    buf: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    timestamp_ns: u64,
) -> Option<ImageData> {
    let stride_y = stride.max(width) as usize;
    let stride_c = stride_y.div_ceil(2);
    let y_len = stride_y * height as usize;
    let c_len = stride_c * height.div_ceil(2) as usize;

    let y = buf.get(..y_len)?;
    let u = buf.get(y_len..y_len + c_len)?;
    let v = buf.get(y_len + c_len..y_len + 2 * c_len)?;

    Some(ImageData {
        planes: vec![
            PlaneData::new(y.to_vec(), stride_y as u32, 1),
            PlaneData::new(u.to_vec(), stride_c as u32, 1),
            PlaneData::new(v.to_vec(), stride_c as u32, 1),
        ],
        timestamp_ns,
    })
}
