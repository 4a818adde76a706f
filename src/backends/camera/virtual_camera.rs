// SPDX-License-Identifier: GPL-3.0-only

//! In-process simulated camera subsystem
//!
//! Behaves like a callback-driven OS camera service: open and session
//! requests complete on spawned threads after a short delay, and a repeating
//! request streams into the session's output target. Every outcome can be
//! scripted, which makes the backend the test double for the controller and
//! the default backend of the CLI demo.
//!
//! Frames are either injected with [`VirtualCameraSystem::emit_frame`] or
//! produced by a pattern generator thread at a fixed rate.

use super::image_reader::{ImageData, OutputTarget, PlaneData};
use super::orientation::DisplayRotation;
use super::types::*;
use super::{
    CameraDevice, CameraSystem, CaptureRequest, CaptureSession, DeviceCallback, DeviceEvent,
    SessionCallback, SessionEvent,
};
use crate::constants::timing;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How an open request completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The device opens
    Open,
    /// The device reports an error
    Error(DeviceErrorCode),
    /// The device disconnects before opening
    Disconnect,
    /// The request is refused synchronously
    Refuse(BackendError),
    /// The callback is held until [`VirtualCameraSystem::complete_deferred_open`]
    Defer,
}

/// How a session request completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Configure,
    /// The configure-failed callback fires
    Fail,
    /// The request is refused synchronously
    Refuse,
}

/// How a repeating request submission completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Accept,
    Reject,
}

/// A scripted camera
#[derive(Debug, Clone)]
pub struct VirtualCamera {
    pub id: String,
    pub characteristics: CameraCharacteristics,
}

impl VirtualCamera {
    /// Camera advertising YUV 4:2:0 at the given sizes
    pub fn new(id: &str, lens_facing: LensFacing, sensor_orientation: i32, sizes: &[(u32, u32)]) -> Self {
        Self {
            id: id.to_string(),
            characteristics: CameraCharacteristics {
                lens_facing,
                sensor_orientation,
                stream_configurations: sizes
                    .iter()
                    .map(|&(w, h)| StreamConfiguration::new(ImageFormat::Yuv420_888, w, h))
                    .collect(),
            },
        }
    }

    /// Add a configuration in another format
    pub fn with_configuration(mut self, format: ImageFormat, width: u32, height: u32) -> Self {
        self.characteristics
            .stream_configurations
            .push(StreamConfiguration::new(format, width, height));
        self
    }
}

/// Stop flag of a running pattern generator
struct Generator {
    stop: Arc<AtomicBool>,
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// The session currently streaming
struct Stream {
    session_serial: u64,
    target: OutputTarget,
    _generator: Option<Generator>,
}

struct DeferredOpen {
    camera_id: String,
    callback: DeviceCallback,
}

struct State {
    permission: bool,
    display_rotation: DisplayRotation,
    open_outcome: OpenOutcome,
    session_outcome: SessionOutcome,
    request_outcome: RequestOutcome,
    enumeration_error: Option<BackendError>,
    pattern_fps: Option<u32>,
    /// Callback of the device currently open
    live_device: Option<(u64, DeviceCallback)>,
    deferred: Option<DeferredOpen>,
    stream: Option<Stream>,
}

struct Shared {
    cameras: Vec<VirtualCamera>,
    state: Mutex<State>,
    next_serial: AtomicU64,
    frame_sequence: AtomicU64,
    open_requests: AtomicUsize,
    open_devices: AtomicUsize,
    repeating_requests: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn serial(&self) -> u64 {
        self.next_serial.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn camera(&self, camera_id: &str) -> BackendResult<&VirtualCamera> {
        self.cameras
            .iter()
            .find(|c| c.id == camera_id)
            .ok_or_else(|| BackendError::DeviceNotFound(camera_id.to_string()))
    }

    /// Create an open device and hand it to `callback`
    fn deliver_open(self: &Arc<Self>, camera_id: String, callback: DeviceCallback) {
        let serial = self.serial();
        self.open_devices.fetch_add(1, Ordering::SeqCst);
        self.lock().live_device = Some((serial, callback.clone()));

        let device = VirtualDevice {
            id: camera_id,
            serial,
            shared: Arc::clone(self),
            closed: false,
        };
        debug!(device = %device.id, serial, "Virtual camera opened");
        callback.notify(DeviceEvent::Opened(Box::new(device)));
    }
}

/// Run `f` on a new thread after the simulated callback latency
fn deliver_later(f: impl FnOnce() + Send + 'static) {
    thread::spawn(move || {
        thread::sleep(timing::VIRTUAL_CALLBACK_DELAY);
        f();
    });
}

/// Simulated camera subsystem
#[derive(Clone)]
pub struct VirtualCameraSystem {
    shared: Arc<Shared>,
}

impl VirtualCameraSystem {
    pub fn new(cameras: Vec<VirtualCamera>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cameras,
                state: Mutex::new(State {
                    permission: true,
                    display_rotation: DisplayRotation::Rotation0,
                    open_outcome: OpenOutcome::Open,
                    session_outcome: SessionOutcome::Configure,
                    request_outcome: RequestOutcome::Accept,
                    enumeration_error: None,
                    pattern_fps: None,
                    live_device: None,
                    deferred: None,
                    stream: None,
                }),
                next_serial: AtomicU64::new(0),
                frame_sequence: AtomicU64::new(0),
                open_requests: AtomicUsize::new(0),
                open_devices: AtomicUsize::new(0),
                repeating_requests: AtomicUsize::new(0),
            }),
        }
    }

    /// A phone-like layout: front camera first, back camera mounted at 90°,
    /// streaming a moving test pattern at `fps`
    pub fn demo(display_rotation: DisplayRotation, fps: u32) -> Self {
        let system = Self::new(vec![
            VirtualCamera::new("0", LensFacing::Front, 270, &[(640, 480), (320, 240)]),
            VirtualCamera::new("1", LensFacing::Back, 90, &[(640, 480), (320, 240), (1280, 720)])
                .with_configuration(ImageFormat::Jpeg, 1920, 1080),
        ]);
        system.set_display_rotation(display_rotation);
        system.set_pattern_fps((fps > 0).then_some(fps));
        system
    }

    pub fn set_permission(&self, granted: bool) {
        self.shared.lock().permission = granted;
    }

    pub fn set_display_rotation(&self, rotation: DisplayRotation) {
        self.shared.lock().display_rotation = rotation;
    }

    pub fn set_open_outcome(&self, outcome: OpenOutcome) {
        self.shared.lock().open_outcome = outcome;
    }

    pub fn set_session_outcome(&self, outcome: SessionOutcome) {
        self.shared.lock().session_outcome = outcome;
    }

    pub fn set_request_outcome(&self, outcome: RequestOutcome) {
        self.shared.lock().request_outcome = outcome;
    }

    /// Make `camera_ids` fail with `error` (or succeed again with `None`)
    pub fn set_enumeration_error(&self, error: Option<BackendError>) {
        self.shared.lock().enumeration_error = error;
    }

    /// Rate of the pattern generator started by repeating requests; `None` disables it
    pub fn set_pattern_fps(&self, fps: Option<u32>) {
        self.shared.lock().pattern_fps = fps;
    }

    /// Deliver a held open callback; returns `false` if none was held
    pub fn complete_deferred_open(&self) -> bool {
        let Some(deferred) = self.shared.lock().deferred.take() else {
            return false;
        };
        let shared = Arc::clone(&self.shared);
        deliver_later(move || shared.deliver_open(deferred.camera_id, deferred.callback));
        true
    }

    /// Offer a frame to the streaming target
    ///
    /// Returns `false` when nothing is streaming or the reader discarded it.
    pub fn emit_frame(&self, image: ImageData) -> bool {
        let target = match &self.shared.lock().stream {
            Some(stream) => stream.target.clone(),
            None => {
                trace!("No active stream, frame not emitted");
                return false;
            }
        };
        target.offer(image)
    }

    /// Offer a generated test pattern frame to the streaming target
    pub fn emit_pattern_frame(&self) -> bool {
        let format = match &self.shared.lock().stream {
            Some(stream) => stream.target.format(),
            None => return false,
        };
        let sequence = self.shared.frame_sequence.fetch_add(1, Ordering::Relaxed);
        self.emit_frame(pattern_frame(format, sequence))
    }

    /// Report a disconnect on the open device
    pub fn disconnect(&self) -> bool {
        self.notify_live(DeviceEvent::Disconnected)
    }

    /// Report a device error on the open device
    pub fn raise_error(&self, code: DeviceErrorCode) -> bool {
        self.notify_live(DeviceEvent::Error(code))
    }

    fn notify_live(&self, event: DeviceEvent) -> bool {
        let callback = match &self.shared.lock().live_device {
            Some((_, callback)) => callback.clone(),
            None => return false,
        };
        warn!(event = ?event, "Injecting virtual device event");
        callback.notify(event);
        true
    }

    /// Open requests accepted since creation
    pub fn open_request_count(&self) -> usize {
        self.shared.open_requests.load(Ordering::SeqCst)
    }

    /// Devices opened and not yet closed
    pub fn open_device_count(&self) -> usize {
        self.shared.open_devices.load(Ordering::SeqCst)
    }

    /// Repeating requests accepted since creation
    pub fn repeating_request_count(&self) -> usize {
        self.shared.repeating_requests.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.lock().stream.is_some()
    }
}

impl CameraSystem for VirtualCameraSystem {
    fn backend_type(&self) -> CameraBackendType {
        CameraBackendType::Virtual
    }

    fn has_camera_permission(&self) -> bool {
        self.shared.lock().permission
    }

    fn camera_ids(&self) -> BackendResult<Vec<String>> {
        if let Some(error) = self.shared.lock().enumeration_error.clone() {
            return Err(error);
        }
        Ok(self.shared.cameras.iter().map(|c| c.id.clone()).collect())
    }

    fn characteristics(&self, camera_id: &str) -> BackendResult<CameraCharacteristics> {
        Ok(self.shared.camera(camera_id)?.characteristics.clone())
    }

    fn display_rotation(&self) -> DisplayRotation {
        self.shared.lock().display_rotation
    }

    fn open_camera(&self, camera_id: &str, callback: DeviceCallback) -> BackendResult<()> {
        self.shared.camera(camera_id)?;
        let outcome = self.shared.lock().open_outcome.clone();
        info!(camera = %camera_id, outcome = ?outcome, "Virtual camera open requested");

        match outcome {
            OpenOutcome::Refuse(error) => return Err(error),
            OpenOutcome::Open => {
                let shared = Arc::clone(&self.shared);
                let camera_id = camera_id.to_string();
                deliver_later(move || shared.deliver_open(camera_id, callback));
            }
            OpenOutcome::Error(code) => {
                deliver_later(move || callback.notify(DeviceEvent::Error(code)));
            }
            OpenOutcome::Disconnect => {
                deliver_later(move || callback.notify(DeviceEvent::Disconnected));
            }
            OpenOutcome::Defer => {
                self.shared.lock().deferred = Some(DeferredOpen {
                    camera_id: camera_id.to_string(),
                    callback,
                });
            }
        }

        self.shared.open_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct VirtualDevice {
    id: String,
    serial: u64,
    shared: Arc<Shared>,
    closed: bool,
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<OutputTarget>,
        callback: SessionCallback,
    ) -> BackendResult<()> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        if outputs.is_empty() {
            return Err(BackendError::InvalidRequest("no outputs".to_string()));
        }

        let outcome = self.shared.lock().session_outcome;
        debug!(device = %self.id, outcome = ?outcome, "Virtual session requested");

        match outcome {
            SessionOutcome::Refuse => {
                return Err(BackendError::InvalidRequest(
                    "session configuration refused".to_string(),
                ));
            }
            SessionOutcome::Fail => {
                deliver_later(move || callback.notify(SessionEvent::ConfigureFailed));
            }
            SessionOutcome::Configure => {
                let session = VirtualSession {
                    serial: self.shared.serial(),
                    device_serial: self.serial,
                    shared: Arc::clone(&self.shared),
                    outputs,
                    closed: false,
                };
                deliver_later(move || callback.notify(SessionEvent::Configured(Box::new(session))));
            }
        }
        Ok(())
    }

    fn create_capture_request(&self, template: RequestTemplate) -> BackendResult<CaptureRequest> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        Ok(CaptureRequest::new(template))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.open_devices.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.shared.lock();
        if matches!(state.live_device, Some((serial, _)) if serial == self.serial) {
            state.live_device = None;
        }
        debug!(device = %self.id, serial = self.serial, "Virtual camera closed");
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.close();
    }
}

struct VirtualSession {
    serial: u64,
    device_serial: u64,
    shared: Arc<Shared>,
    outputs: Vec<OutputTarget>,
    closed: bool,
}

impl CaptureSession for VirtualSession {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> BackendResult<()> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        let mut state = self.shared.lock();
        if !matches!(state.live_device, Some((serial, _)) if serial == self.device_serial) {
            return Err(BackendError::Closed);
        }
        if state.request_outcome == RequestOutcome::Reject {
            return Err(BackendError::InvalidRequest(
                "repeating request rejected".to_string(),
            ));
        }

        let Some(target) = request.targets().first() else {
            return Err(BackendError::InvalidRequest("request has no target".to_string()));
        };
        if !self.outputs.iter().any(|o| o.same_surface(target)) {
            return Err(BackendError::InvalidRequest(
                "target is not a session output".to_string(),
            ));
        }

        let generator = state
            .pattern_fps
            .map(|fps| spawn_generator(target.clone(), fps, Arc::clone(&self.shared)));
        state.stream = Some(Stream {
            session_serial: self.serial,
            target: target.clone(),
            _generator: generator,
        });
        self.shared.repeating_requests.fetch_add(1, Ordering::SeqCst);

        info!(
            template = request.template().code(),
            format = %target.format(),
            "Virtual repeating request active"
        );
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.shared.lock();
        if state
            .stream
            .as_ref()
            .is_some_and(|s| s.session_serial == self.serial)
        {
            state.stream = None;
        }
        debug!(serial = self.serial, "Virtual session closed");
    }
}

impl Drop for VirtualSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_generator(target: OutputTarget, fps: u32, shared: Arc<Shared>) -> Generator {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));

    debug!(fps, "Starting virtual pattern generator");
    thread::spawn(move || {
        while !stop_clone.load(Ordering::SeqCst) && !target.is_closed() {
            thread::sleep(interval);
            let sequence = shared.frame_sequence.fetch_add(1, Ordering::Relaxed);
            target.offer(pattern_frame(target.format(), sequence));
        }
        debug!("Virtual pattern generator exiting");
    });

    Generator { stop }
}

/// Row padding added to every plane, as real sensors often do
const ROW_PADDING: u32 = 16;

/// Build a YUV 4:2:0 test frame with padded rows
///
/// Luma is a diagonal gradient shifted by `sequence`; chroma is neutral
/// except for a colored band in the top quarter.
pub fn pattern_frame(format: StreamFormat, sequence: u64) -> ImageData {
    let (width, height) = (format.width(), format.height());
    let stride_y = width + ROW_PADDING;
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);
    let stride_c = chroma_width + ROW_PADDING;

    let mut y = vec![0u8; (stride_y * height) as usize];
    for row in 0..height {
        for col in 0..width {
            y[(row * stride_y + col) as usize] = ((u64::from(row + col) + sequence) & 0xff) as u8;
        }
    }

    let mut u = vec![128u8; (stride_c * chroma_height) as usize];
    let mut v = vec![128u8; (stride_c * chroma_height) as usize];
    for row in 0..chroma_height / 4 {
        for col in 0..chroma_width {
            let index = (row * stride_c + col) as usize;
            u[index] = 90;
            v[index] = 240;
        }
    }

    ImageData {
        planes: vec![
            PlaneData::new(y, stride_y, 1),
            PlaneData::new(u, stride_c, 1),
            PlaneData::new(v, stride_c, 1),
        ],
        timestamp_ns: sequence * 1_000_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::image_reader::ImageReader;
    use std::sync::mpsc;

    fn system() -> VirtualCameraSystem {
        VirtualCameraSystem::new(vec![VirtualCamera::new(
            "0",
            LensFacing::Back,
            90,
            &[(320, 240)],
        )])
    }

    fn open(system: &VirtualCameraSystem) -> Box<dyn CameraDevice> {
        let (tx, rx) = mpsc::channel();
        system
            .open_camera(
                "0",
                DeviceCallback::new(move |event| {
                    let _ = tx.send(event);
                }),
            )
            .unwrap();
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            DeviceEvent::Opened(device) => device,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unknown_camera_refused() {
        let result = system().open_camera("9", DeviceCallback::new(|_| {}));
        assert!(matches!(result, Err(BackendError::DeviceNotFound(_))));
    }

    #[test]
    fn test_open_and_close_counts_devices() {
        let system = system();
        let mut device = open(&system);
        assert_eq!(system.open_device_count(), 1);

        device.close();
        device.close();
        assert_eq!(system.open_device_count(), 0);
    }

    #[test]
    fn test_streaming_delivers_to_target() {
        let system = system();
        let mut device = open(&system);
        let reader = ImageReader::new(StreamFormat::new(ImageFormat::Yuv420_888, 320, 240), 1);

        let (tx, rx) = mpsc::channel();
        device
            .create_capture_session(
                vec![reader.surface()],
                SessionCallback::new(move |event| {
                    let _ = tx.send(event);
                }),
            )
            .unwrap();
        let mut session = match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            SessionEvent::Configured(session) => session,
            other => panic!("unexpected event {:?}", other),
        };

        let mut request = device.create_capture_request(RequestTemplate::Preview).unwrap();
        request.add_target(reader.surface());
        session.set_repeating_request(request).unwrap();

        assert!(system.emit_pattern_frame());
        let image = reader.acquire_next_image().unwrap().unwrap();
        assert_eq!(image.planes().len(), 3);
        assert_eq!(image.planes()[0].row_stride(), 320 + ROW_PADDING);

        session.close();
        assert!(!system.is_streaming());
        assert!(!system.emit_pattern_frame());
    }

    #[test]
    fn test_request_for_foreign_target_rejected() {
        let system = system();
        let mut device = open(&system);
        let format = StreamFormat::new(ImageFormat::Yuv420_888, 320, 240);
        let reader = ImageReader::new(format, 1);
        let other = ImageReader::new(format, 1);

        let (tx, rx) = mpsc::channel();
        device
            .create_capture_session(
                vec![reader.surface()],
                SessionCallback::new(move |event| {
                    let _ = tx.send(event);
                }),
            )
            .unwrap();
        let SessionEvent::Configured(mut session) = rx.recv_timeout(Duration::from_secs(2)).unwrap()
        else {
            panic!("session not configured");
        };

        let mut request = CaptureRequest::new(RequestTemplate::Preview);
        request.add_target(other.surface());
        assert!(session.set_repeating_request(request).is_err());
        assert_eq!(system.repeating_request_count(), 0);
    }

    #[test]
    fn test_pattern_frame_layout() {
        let format = StreamFormat::new(ImageFormat::Yuv420_888, 6, 4);
        let frame = pattern_frame(format, 3);

        assert_eq!(frame.planes[0].data().len(), ((6 + ROW_PADDING) * 4) as usize);
        assert_eq!(frame.planes[1].row_stride(), 3 + ROW_PADDING);
        assert_eq!(frame.planes[0].data()[0], 3);
        assert_eq!(frame.planes[0].data()[(6 + ROW_PADDING) as usize + 1], 5);
    }
}
