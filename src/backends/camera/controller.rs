// SPDX-License-Identifier: GPL-3.0-only

//! Device lifecycle controller
//!
//! Owns the open/configure/close state machine for one capture device at a
//! time. Backend callbacks are turned into `CameraEvent` messages tagged
//! with the start cycle that issued them and handled one by one on a tokio
//! task. Events from an earlier cycle, or events that make no sense in the
//! current state, are logged and dropped after closing whatever resource
//! they carry.
//!
//! ```text
//! Idle ─start─► Opening ─opened─► Open ─► SessionConfiguring ─configured─► Running
//!                  │                             │                           │
//!                  └──── error / disconnect ─────┴───────────────────────────┴──► Failed
//!
//! any state ─stop─► Stopped   (Idle stays Idle)
//! ```

use super::delivery::{FrameCounters, FrameDelivery, FrameSink, FrameStats};
use super::format_selector::select_stream_format;
use super::frame_loop::{self, FrameLoop};
use super::image_reader::{ImageReader, ReaderCounts};
use super::orientation::rotation_correction;
use super::session::SessionController;
use super::types::*;
use super::{
    CameraDevice, CameraSystem, CaptureSession, DeviceCallback, DeviceEvent, SessionCallback,
    SessionEvent,
};
use crate::config::Config;
use crate::constants::pipeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Opening,
    Open,
    SessionConfiguring,
    Running,
    Stopped,
    Failed,
}

impl LifecycleState {
    /// A start cycle is in progress or streaming
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecycleState::Opening
                | LifecycleState::Open
                | LifecycleState::SessionConfiguring
                | LifecycleState::Running
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Opening => "opening",
            LifecycleState::Open => "open",
            LifecycleState::SessionConfiguring => "session-configuring",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Errors returned synchronously by [`CaptureController::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    /// A capture cycle is already in progress
    AlreadyRunning,
    /// No camera faces away from the display
    NoBackCamera,
    /// The process may not use the camera
    PermissionDenied,
    /// The camera subsystem refused the request
    DeviceError(DeviceErrorCode),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::AlreadyRunning => write!(f, "Capture already running"),
            StartError::NoBackCamera => write!(f, "No back-facing camera found"),
            StartError::PermissionDenied => write!(f, "Camera permission denied"),
            StartError::DeviceError(code) => write!(f, "Camera error: {}", code),
        }
    }
}

impl std::error::Error for StartError {}

/// Broad class of an asynchronous capture failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Device,
    Session,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Device => write!(f, "device"),
            ErrorKind::Session => write!(f, "session"),
        }
    }
}

/// Why a capture cycle ended in [`LifecycleState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
    /// The device offers no size for the required format
    NoCompatibleFormat,
    /// The device reported an error
    Device(DeviceErrorCode),
    /// The device went away
    Disconnected,
    /// The capture session could not be configured
    SessionConfigurationFailed,
    /// The repeating request could not be built or submitted
    CaptureRequestFailed(String),
}

impl CaptureFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureFailure::NoCompatibleFormat | CaptureFailure::SessionConfigurationFailed => {
                ErrorKind::Configuration
            }
            CaptureFailure::Device(_) | CaptureFailure::Disconnected => ErrorKind::Device,
            CaptureFailure::CaptureRequestFailed(_) => ErrorKind::Session,
        }
    }
}

impl std::fmt::Display for CaptureFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureFailure::NoCompatibleFormat => write!(f, "No compatible stream format"),
            CaptureFailure::Device(code) => write!(f, "Camera device error: {}", code),
            CaptureFailure::Disconnected => write!(f, "Camera disconnected"),
            CaptureFailure::SessionConfigurationFailed => {
                write!(f, "Capture session configuration failed")
            }
            CaptureFailure::CaptureRequestFailed(reason) => {
                write!(f, "Capture request failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for CaptureFailure {}

/// Status published on every state change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CaptureStatus {
    pub state: LifecycleState,
    /// Set while `state` is `Failed`
    pub failure: Option<CaptureFailure>,
    /// Start cycle the status belongs to
    pub generation: u64,
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Pixel format frames must be delivered in
    pub required_format: ImageFormat,
    /// Name given to each frame-processing thread
    pub frame_thread_name: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            required_format: ImageFormat::Yuv420_888,
            frame_thread_name: pipeline::FRAME_THREAD_NAME.to_string(),
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            required_format: config.required_format,
            frame_thread_name: config.frame_thread_name.clone(),
        }
    }
}

/// A backend callback tagged with its start cycle
#[derive(Debug)]
struct CameraEvent {
    generation: u64,
    kind: EventKind,
}

#[derive(Debug)]
enum EventKind {
    Device(DeviceEvent),
    Session(SessionEvent),
}

impl EventKind {
    /// Close any resource the event carries
    fn dispose(self) {
        match self {
            EventKind::Device(DeviceEvent::Opened(mut device)) => {
                debug!(device = %device.id(), "Closing unclaimed device");
                device.close();
            }
            EventKind::Session(SessionEvent::Configured(mut session)) => {
                debug!("Closing unclaimed session");
                session.close();
            }
            _ => {}
        }
    }
}

/// Reader plus the thread draining it
struct Pipeline {
    reader: Arc<ImageReader>,
    frame_loop: FrameLoop,
}

impl Pipeline {
    /// Close the reader and signal the frame thread; returns the reader's final counts
    fn shutdown(self) -> ReaderCounts {
        let counts = self.reader.counts();
        self.reader.close();
        self.frame_loop.request_stop();
        counts
    }
}

struct Opening {
    camera_id: String,
    characteristics: CameraCharacteristics,
    sink: Arc<dyn FrameSink>,
}

/// Internal state; each variant owns what is valid in it
enum Stage {
    Idle,
    Opening(Opening),
    SessionConfiguring {
        device: Box<dyn CameraDevice>,
        pipeline: Pipeline,
    },
    Running {
        device: Box<dyn CameraDevice>,
        session: SessionController,
        pipeline: Pipeline,
    },
    Stopped,
    Failed(CaptureFailure),
}

impl Stage {
    fn lifecycle(&self) -> LifecycleState {
        match self {
            Stage::Idle => LifecycleState::Idle,
            Stage::Opening(_) => LifecycleState::Opening,
            Stage::SessionConfiguring { .. } => LifecycleState::SessionConfiguring,
            Stage::Running { .. } => LifecycleState::Running,
            Stage::Stopped => LifecycleState::Stopped,
            Stage::Failed(_) => LifecycleState::Failed,
        }
    }
}

struct Inner {
    stage: Stage,
    generation: u64,
    stream_format: Option<StreamFormat>,
    rotation_degrees: Option<u32>,
    /// Reader counts of the last finished cycle
    reader_counts: ReaderCounts,
}

struct Core {
    system: Arc<dyn CameraSystem>,
    settings: ControllerSettings,
    inner: Mutex<Inner>,
    running: Arc<AtomicBool>,
    counters: Arc<FrameCounters>,
    status: watch::Sender<CaptureStatus>,
    events: mpsc::UnboundedSender<CameraEvent>,
}

/// Capture controller for a single camera device
///
/// Must be created inside a tokio runtime. `start`, `stop` and `is_running`
/// never wait on device I/O.
pub struct CaptureController {
    core: Arc<Core>,
    event_task: JoinHandle<()>,
}

impl CaptureController {
    pub fn new(system: Arc<dyn CameraSystem>, settings: ControllerSettings) -> Self {
        info!(backend = %system.backend_type(), "Creating capture controller");

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<CameraEvent>();
        let (status, _) = watch::channel(CaptureStatus::default());

        let core = Arc::new(Core {
            system,
            settings,
            inner: Mutex::new(Inner {
                stage: Stage::Idle,
                generation: 0,
                stream_format: None,
                rotation_degrees: None,
                reader_counts: ReaderCounts::default(),
            }),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(FrameCounters::default()),
            status,
            events: events_tx,
        });

        let weak = Arc::downgrade(&core);
        let event_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(core) = weak.upgrade() else {
                    event.kind.dispose();
                    break;
                };
                core.handle_event(event);
            }
            debug!("Camera event task finished");
        });

        Self { core, event_task }
    }

    /// Begin opening the back-facing camera and stream frames into `sink`
    pub fn start(&self, sink: Arc<dyn FrameSink>) -> Result<(), StartError> {
        self.core.start(sink)
    }

    /// Stop capture and release all resources; idempotent
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Whether the repeating request is active
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        self.core.lock().stage.lifecycle()
    }

    pub fn status(&self) -> CaptureStatus {
        self.core.status.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.core.status.subscribe()
    }

    /// Wait until the published status satisfies `f`
    pub async fn wait_for(&self, mut f: impl FnMut(&CaptureStatus) -> bool) -> CaptureStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(|status| f(status)).await {
            Ok(status) => status.clone(),
            // The sender lives in `core`, so this only happens during teardown
            Err(_) => self.status(),
        };
        status
    }

    /// Frame counters of the current (or last) cycle
    pub fn frame_stats(&self) -> FrameStats {
        let inner = self.core.lock();
        let reader_counts = match &inner.stage {
            Stage::SessionConfiguring { pipeline, .. } | Stage::Running { pipeline, .. } => {
                pipeline.reader.counts()
            }
            _ => inner.reader_counts,
        };
        self.core.counters.snapshot(reader_counts)
    }

    /// Stream format selected for the current (or last) cycle
    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.core.lock().stream_format
    }

    /// Rotation correction computed when the device was opened
    pub fn rotation_degrees(&self) -> Option<u32> {
        self.core.lock().rotation_degrees
    }

    pub fn backend_type(&self) -> CameraBackendType {
        self.core.system.backend_type()
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.core.stop();
        self.event_task.abort();
    }
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        let failure = match &inner.stage {
            Stage::Failed(failure) => Some(failure.clone()),
            _ => None,
        };
        self.status.send_replace(CaptureStatus {
            state: inner.stage.lifecycle(),
            failure,
            generation: inner.generation,
        });
    }

    fn start(&self, sink: Arc<dyn FrameSink>) -> Result<(), StartError> {
        let mut inner = self.lock();

        let current = inner.stage.lifecycle();
        if current.is_active() {
            warn!(state = %current, "start() while a capture cycle is active");
            return Err(StartError::AlreadyRunning);
        }

        if !self.system.has_camera_permission() {
            warn!("Camera permission not granted");
            return Err(StartError::PermissionDenied);
        }

        let (camera_id, characteristics) = self.find_back_camera()?;

        inner.generation += 1;
        let generation = inner.generation;
        inner.stream_format = None;
        inner.rotation_degrees = None;
        inner.reader_counts = ReaderCounts::default();
        self.counters.reset();

        if let Err(e) = self
            .system
            .open_camera(&camera_id, self.device_callback(generation))
        {
            error!(camera = %camera_id, error = %e, "Camera open request refused");
            inner.stage = Stage::Idle;
            self.publish(&inner);
            return Err(StartError::DeviceError(e.error_code()));
        }

        info!(camera = %camera_id, generation, "Opening camera");
        inner.stage = Stage::Opening(Opening {
            camera_id,
            characteristics,
            sink,
        });
        self.publish(&inner);
        Ok(())
    }

    /// First back-facing camera in subsystem order
    fn find_back_camera(&self) -> Result<(String, CameraCharacteristics), StartError> {
        let ids = self.system.camera_ids().map_err(|e| {
            error!(error = %e, "Failed to enumerate cameras");
            StartError::DeviceError(e.error_code())
        })?;

        for id in ids {
            let characteristics = self.system.characteristics(&id).map_err(|e| {
                error!(camera = %id, error = %e, "Failed to query camera characteristics");
                StartError::DeviceError(e.error_code())
            })?;

            if characteristics.lens_facing == LensFacing::Back {
                debug!(
                    camera = %id,
                    sensor_orientation = characteristics.sensor_orientation,
                    "Found back-facing camera"
                );
                return Ok((id, characteristics));
            }
        }

        warn!("No back-facing camera");
        Err(StartError::NoBackCamera)
    }

    fn device_callback(&self, generation: u64) -> DeviceCallback {
        let events = self.events.clone();
        DeviceCallback::new(move |event| {
            let event = CameraEvent {
                generation,
                kind: EventKind::Device(event),
            };
            if let Err(mpsc::error::SendError(event)) = events.send(event) {
                event.kind.dispose();
            }
        })
    }

    fn session_callback(&self, generation: u64) -> SessionCallback {
        let events = self.events.clone();
        SessionCallback::new(move |event| {
            let event = CameraEvent {
                generation,
                kind: EventKind::Session(event),
            };
            if let Err(mpsc::error::SendError(event)) = events.send(event) {
                event.kind.dispose();
            }
        })
    }

    fn handle_event(&self, event: CameraEvent) {
        let mut inner = self.lock();

        if event.generation != inner.generation {
            warn!(
                event_generation = event.generation,
                generation = inner.generation,
                event = ?event.kind,
                "Dropping camera event from an earlier cycle"
            );
            event.kind.dispose();
            return;
        }

        let stage = std::mem::replace(&mut inner.stage, Stage::Idle);
        let next = match (stage, event.kind) {
            (Stage::Opening(opening), EventKind::Device(DeviceEvent::Opened(device))) => {
                self.on_opened(&mut inner, opening, device)
            }
            (Stage::Opening(opening), EventKind::Device(DeviceEvent::Error(code))) => {
                error!(camera = %opening.camera_id, code = %code, "Camera open failed");
                Stage::Failed(CaptureFailure::Device(code))
            }
            (Stage::Opening(opening), EventKind::Device(DeviceEvent::Disconnected)) => {
                warn!(camera = %opening.camera_id, "Camera disconnected while opening");
                Stage::Failed(CaptureFailure::Disconnected)
            }
            (
                Stage::SessionConfiguring { device, pipeline },
                EventKind::Session(SessionEvent::Configured(session)),
            ) => self.on_configured(&mut inner, device, session, pipeline),
            (
                stage @ Stage::SessionConfiguring { .. },
                EventKind::Session(SessionEvent::ConfigureFailed),
            ) => {
                error!("Capture session configuration failed");
                self.teardown(stage, &mut inner);
                Stage::Failed(CaptureFailure::SessionConfigurationFailed)
            }
            (
                stage @ (Stage::SessionConfiguring { .. } | Stage::Running { .. }),
                EventKind::Device(DeviceEvent::Disconnected),
            ) => {
                warn!(state = %stage.lifecycle(), "Camera disconnected");
                self.teardown(stage, &mut inner);
                Stage::Failed(CaptureFailure::Disconnected)
            }
            (
                stage @ (Stage::SessionConfiguring { .. } | Stage::Running { .. }),
                EventKind::Device(DeviceEvent::Error(code)),
            ) => {
                error!(state = %stage.lifecycle(), code = %code, "Camera device error");
                self.teardown(stage, &mut inner);
                Stage::Failed(CaptureFailure::Device(code))
            }
            (stage, kind) => {
                warn!(
                    state = %stage.lifecycle(),
                    event = ?kind,
                    "Ignoring camera event not valid in current state"
                );
                kind.dispose();
                stage
            }
        };

        inner.stage = next;
        self.publish(&inner);
    }

    fn on_opened(
        &self,
        inner: &mut Inner,
        opening: Opening,
        mut device: Box<dyn CameraDevice>,
    ) -> Stage {
        let generation = inner.generation;
        info!(camera = %device.id(), generation, "Camera opened");
        self.status.send_replace(CaptureStatus {
            state: LifecycleState::Open,
            failure: None,
            generation,
        });

        let display = self.system.display_rotation();
        let rotation = rotation_correction(
            opening.characteristics.sensor_orientation,
            display.degrees(),
        );
        inner.rotation_degrees = Some(rotation);

        let format = match select_stream_format(
            &opening.characteristics.stream_configurations,
            self.settings.required_format,
        ) {
            Ok(format) => format,
            Err(e) => {
                error!(camera = %device.id(), error = %e, "Cannot configure stream");
                device.close();
                return Stage::Failed(CaptureFailure::NoCompatibleFormat);
            }
        };
        inner.stream_format = Some(format);

        let reader = Arc::new(ImageReader::new(format, pipeline::MAX_IMAGES));
        let (waker, wake) = frame_loop::wake_channel();
        reader.set_listener(Arc::new(move || waker.wake()));

        let delivery = FrameDelivery::new(
            Arc::clone(&reader),
            opening.sink,
            Arc::clone(&self.running),
            Arc::clone(&self.counters),
            rotation,
        );
        let frame_loop = match FrameLoop::spawn(&self.settings.frame_thread_name, wake, move || {
            delivery.on_image_available().loop_action()
        }) {
            Ok(frame_loop) => frame_loop,
            Err(e) => {
                error!(error = %e, "Failed to spawn frame thread");
                reader.close();
                device.close();
                return Stage::Failed(CaptureFailure::SessionConfigurationFailed);
            }
        };
        let pipeline = Pipeline { reader, frame_loop };

        if let Err(e) = device.create_capture_session(
            vec![pipeline.reader.surface()],
            self.session_callback(generation),
        ) {
            error!(camera = %device.id(), error = %e, "Capture session request refused");
            inner.reader_counts = pipeline.shutdown();
            device.close();
            return Stage::Failed(CaptureFailure::SessionConfigurationFailed);
        }

        debug!(format = %format, rotation, "Capture session requested");
        Stage::SessionConfiguring { device, pipeline }
    }

    fn on_configured(
        &self,
        inner: &mut Inner,
        mut device: Box<dyn CameraDevice>,
        session: Box<dyn CaptureSession>,
        pipeline: Pipeline,
    ) -> Stage {
        match SessionController::engage(device.as_ref(), session, &pipeline.reader.surface()) {
            Ok(session) => {
                self.running.store(true, Ordering::SeqCst);
                info!(camera = %device.id(), "Capture running");
                Stage::Running {
                    device,
                    session,
                    pipeline,
                }
            }
            Err(e) => {
                error!(camera = %device.id(), error = %e, "Failed to start preview");
                inner.reader_counts = pipeline.shutdown();
                device.close();
                Stage::Failed(CaptureFailure::CaptureRequestFailed(e.to_string()))
            }
        }
    }

    /// Release everything a stage owns
    fn teardown(&self, stage: Stage, inner: &mut Inner) {
        self.running.store(false, Ordering::SeqCst);

        match stage {
            Stage::SessionConfiguring {
                mut device,
                pipeline,
            } => {
                inner.reader_counts = pipeline.shutdown();
                device.close();
            }
            Stage::Running {
                mut device,
                mut session,
                pipeline,
            } => {
                inner.reader_counts = pipeline.shutdown();
                session.close();
                device.close();
            }
            Stage::Idle | Stage::Opening(_) | Stage::Stopped | Stage::Failed(_) => {}
        }
    }

    fn stop(&self) {
        let mut inner = self.lock();

        match std::mem::replace(&mut inner.stage, Stage::Idle) {
            Stage::Idle => {
                debug!("stop() before any start, nothing to do");
            }
            Stage::Stopped => {
                inner.stage = Stage::Stopped;
            }
            stage => {
                info!(state = %stage.lifecycle(), "Stopping capture");
                self.teardown(stage, &mut inner);
                inner.stage = Stage::Stopped;
                self.publish(&inner);
            }
        }
    }
}
