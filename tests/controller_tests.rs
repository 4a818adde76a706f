// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture controller, driven by the virtual backend

use camera_capture::backends::camera::image_reader::{ImageData, PlaneData};
use camera_capture::backends::camera::virtual_camera::{
    OpenOutcome, RequestOutcome, SessionOutcome, VirtualCamera, VirtualCameraSystem,
};
use camera_capture::backends::camera::{
    BackendError, CameraBackendType, CaptureController, CaptureFailure, CaptureStatus,
    ControllerSettings, DeviceErrorCode, DisplayRotation, ErrorKind, ExtractedFrame, FrameSink,
    ImageFormat, LensFacing, LifecycleState, StartError,
};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn back_camera() -> VirtualCamera {
    VirtualCamera::new(
        "1",
        LensFacing::Back,
        90,
        &[(640, 480), (320, 240), (1280, 720)],
    )
}

fn system_with(cameras: Vec<VirtualCamera>) -> VirtualCameraSystem {
    VirtualCameraSystem::new(cameras)
}

fn default_system() -> VirtualCameraSystem {
    system_with(vec![
        VirtualCamera::new("0", LensFacing::Front, 270, &[(320, 240)]),
        back_camera(),
    ])
}

fn controller(system: &VirtualCameraSystem) -> CaptureController {
    CaptureController::new(Arc::new(system.clone()), ControllerSettings::default())
}

fn channel_sink() -> (Arc<dyn FrameSink>, mpsc::UnboundedReceiver<ExtractedFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = move |frame: ExtractedFrame| {
        let _ = tx.send(frame);
    };
    (Arc::new(sink), rx)
}

async fn wait_for_state(controller: &CaptureController, state: LifecycleState) -> CaptureStatus {
    tokio::time::timeout(WAIT, controller.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, at {}", controller.state()))
}

async fn wait_until(mut f: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<ExtractedFrame>) -> ExtractedFrame {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("sink channel closed")
}

/// A 320x240 frame with padded rows and recognisable plane contents
fn padded_frame() -> ImageData {
    let (stride_y, stride_c) = (336, 176);
    let y: Vec<u8> = (0..stride_y * 240).map(|i| (i % 251) as u8).collect();
    let u: Vec<u8> = (0..stride_c * 120).map(|i| (i % 241) as u8).collect();
    let v: Vec<u8> = (0..stride_c * 120).map(|i| (i % 239) as u8).collect();
    ImageData {
        planes: vec![
            PlaneData::new(y, stride_y, 1),
            PlaneData::new(u, stride_c, 1),
            PlaneData::new(v, stride_c, 1),
        ],
        timestamp_ns: 42,
    }
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let system = default_system();
    let controller = controller(&system);

    controller.stop();
    controller.stop();

    assert_eq!(controller.state(), LifecycleState::Idle);
    assert!(!controller.is_running());
    assert_eq!(system.open_request_count(), 0);
}

#[tokio::test]
async fn test_end_to_end_frame_delivery() {
    let system = default_system();
    system.set_display_rotation(DisplayRotation::Rotation90);
    let controller = controller(&system);
    let (sink, mut frames) = channel_sink();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Running).await;
    assert_eq!(status.generation, 1);
    assert!(controller.is_running());
    assert_eq!(system.repeating_request_count(), 1);

    let format = controller.stream_format().unwrap();
    assert_eq!((format.width(), format.height()), (320, 240));
    assert_eq!(format.pixel_format(), ImageFormat::Yuv420_888);

    let sent = padded_frame();
    assert!(system.emit_frame(sent.clone()));
    let frame = next_frame(&mut frames).await;

    assert_eq!(frame.width, 320);
    assert_eq!(frame.height, 240);
    assert_eq!(frame.rotation_degrees, 180);
    assert_eq!(frame.plane_y, sent.planes[0].data());
    assert_eq!(frame.plane_u, sent.planes[1].data());
    assert_eq!(frame.plane_v, sent.planes[2].data());
    assert_eq!(frame.stride_y, 336);
    assert_eq!(frame.stride_u, 176);
    assert_eq!(frame.stride_v, 176);
    wait_until(|| controller.frame_stats().delivered == 1).await;

    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(!controller.is_running());
    assert!(!system.is_streaming());
    assert_eq!(system.open_device_count(), 0);
    assert_eq!(controller.frame_stats().delivered, 1);

    // Second stop is a no-op
    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_rotation_sampled_at_open() {
    let system = default_system();
    system.set_display_rotation(DisplayRotation::Rotation270);
    let controller = controller(&system);
    let (sink, mut frames) = channel_sink();

    controller.start(sink).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;
    system.set_display_rotation(DisplayRotation::Rotation0);

    assert!(system.emit_pattern_frame());
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.rotation_degrees, 0);
    assert_eq!(controller.rotation_degrees(), Some(0));
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let system = default_system();
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(Arc::clone(&sink)).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;

    assert_eq!(controller.start(sink), Err(StartError::AlreadyRunning));
    assert!(controller.is_running());
    assert!(system.is_streaming());
    assert_eq!(system.open_request_count(), 1);
    assert_eq!(system.repeating_request_count(), 1);
}

#[tokio::test]
async fn test_start_while_opening_is_rejected() {
    let system = default_system();
    system.set_open_outcome(OpenOutcome::Defer);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(Arc::clone(&sink)).unwrap();
    assert_eq!(controller.state(), LifecycleState::Opening);
    assert_eq!(controller.start(sink), Err(StartError::AlreadyRunning));
}

#[tokio::test]
async fn test_restart_after_stop() {
    let system = default_system();
    let controller = controller(&system);
    let (sink, mut frames) = channel_sink();

    controller.start(Arc::clone(&sink)).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;
    controller.stop();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Running).await;
    assert_eq!(status.generation, 2);
    assert_eq!(controller.frame_stats().delivered, 0);

    assert!(system.emit_pattern_frame());
    next_frame(&mut frames).await;
    assert_eq!(system.open_device_count(), 1);
}

#[tokio::test]
async fn test_permission_denied() {
    let system = default_system();
    system.set_permission(false);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    assert_eq!(controller.start(sink), Err(StartError::PermissionDenied));
    assert_eq!(controller.state(), LifecycleState::Idle);
    assert_eq!(system.open_request_count(), 0);
}

#[tokio::test]
async fn test_no_back_camera() {
    let system = system_with(vec![VirtualCamera::new(
        "0",
        LensFacing::Front,
        270,
        &[(320, 240)],
    )]);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    assert_eq!(controller.start(sink), Err(StartError::NoBackCamera));
    assert_eq!(controller.state(), LifecycleState::Idle);
}

#[tokio::test]
async fn test_enumeration_failure_is_device_error() {
    let system = default_system();
    system.set_enumeration_error(Some(BackendError::NotAvailable("service down".into())));
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    assert_eq!(
        controller.start(sink),
        Err(StartError::DeviceError(DeviceErrorCode::CAMERA_SERVICE))
    );
}

#[tokio::test]
async fn test_open_refused_synchronously() {
    let system = default_system();
    system.set_open_outcome(OpenOutcome::Refuse(BackendError::Device(
        DeviceErrorCode::CAMERA_DISABLED,
    )));
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    assert_eq!(
        controller.start(sink),
        Err(StartError::DeviceError(DeviceErrorCode::CAMERA_DISABLED))
    );
    assert_eq!(controller.state(), LifecycleState::Idle);
    assert!(!controller.is_running());
}

#[tokio::test]
async fn test_open_error_fails() {
    let system = default_system();
    system.set_open_outcome(OpenOutcome::Error(DeviceErrorCode::CAMERA_IN_USE));
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Failed).await;

    assert_eq!(
        status.failure,
        Some(CaptureFailure::Device(DeviceErrorCode::CAMERA_IN_USE))
    );
    assert_eq!(status.failure.unwrap().kind(), ErrorKind::Device);
    assert!(!controller.is_running());
}

#[tokio::test]
async fn test_disconnect_while_opening_fails() {
    let system = default_system();
    system.set_open_outcome(OpenOutcome::Disconnect);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Failed).await;
    assert_eq!(status.failure, Some(CaptureFailure::Disconnected));
}

#[tokio::test]
async fn test_no_compatible_format() {
    let system = system_with(vec![
        VirtualCamera::new("1", LensFacing::Back, 90, &[]).with_configuration(
            ImageFormat::Jpeg,
            1920,
            1080,
        ),
    ]);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Failed).await;

    assert_eq!(status.failure, Some(CaptureFailure::NoCompatibleFormat));
    assert_eq!(status.failure.unwrap().kind(), ErrorKind::Configuration);
    wait_until(|| system.open_device_count() == 0).await;
}

#[tokio::test]
async fn test_session_configuration_failure() {
    let system = default_system();
    system.set_session_outcome(SessionOutcome::Fail);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Failed).await;

    assert_eq!(
        status.failure,
        Some(CaptureFailure::SessionConfigurationFailed)
    );
    assert_eq!(system.open_device_count(), 0);
}

#[tokio::test]
async fn test_session_refused_synchronously() {
    let system = default_system();
    system.set_session_outcome(SessionOutcome::Refuse);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Failed).await;

    assert_eq!(
        status.failure,
        Some(CaptureFailure::SessionConfigurationFailed)
    );
    assert_eq!(system.open_device_count(), 0);
}

#[tokio::test]
async fn test_capture_request_rejected() {
    let system = default_system();
    system.set_request_outcome(RequestOutcome::Reject);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    let status = wait_for_state(&controller, LifecycleState::Failed).await;

    let failure = status.failure.unwrap();
    assert!(matches!(failure, CaptureFailure::CaptureRequestFailed(_)));
    assert_eq!(failure.kind(), ErrorKind::Session);
    assert!(!controller.is_running());
    assert_eq!(system.repeating_request_count(), 0);
    assert_eq!(system.open_device_count(), 0);
}

#[tokio::test]
async fn test_disconnect_while_running() {
    let system = default_system();
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;

    assert!(system.disconnect());
    let status = wait_for_state(&controller, LifecycleState::Failed).await;

    assert_eq!(status.failure, Some(CaptureFailure::Disconnected));
    assert!(!controller.is_running());
    assert!(!system.is_streaming());
    assert_eq!(system.open_device_count(), 0);

    // Stopping a failed cycle moves it to Stopped
    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_device_error_while_running() {
    let system = default_system();
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;

    assert!(system.raise_error(DeviceErrorCode::CAMERA_SERVICE));
    let status = wait_for_state(&controller, LifecycleState::Failed).await;
    assert_eq!(
        status.failure,
        Some(CaptureFailure::Device(DeviceErrorCode::CAMERA_SERVICE))
    );
}

#[tokio::test]
async fn test_stale_open_after_stop_is_closed() {
    let system = default_system();
    system.set_open_outcome(OpenOutcome::Defer);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(sink).unwrap();
    controller.stop();
    assert_eq!(controller.state(), LifecycleState::Stopped);

    assert!(system.complete_deferred_open());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(!controller.is_running());
    assert_eq!(system.open_device_count(), 0);
    assert_eq!(system.repeating_request_count(), 0);
}

#[tokio::test]
async fn test_stale_open_does_not_disturb_new_cycle() {
    let system = default_system();
    system.set_open_outcome(OpenOutcome::Defer);
    let controller = controller(&system);
    let (sink, _frames) = channel_sink();

    controller.start(Arc::clone(&sink)).unwrap();
    controller.stop();

    system.set_open_outcome(OpenOutcome::Open);
    controller.start(sink).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;

    assert!(system.complete_deferred_open());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(controller.state(), LifecycleState::Running);
    assert_eq!(controller.status().generation, 2);
    assert_eq!(system.repeating_request_count(), 1);
}

#[tokio::test]
async fn test_missing_planes_are_dropped() {
    let system = default_system();
    let controller = controller(&system);
    let (sink, mut frames) = channel_sink();

    controller.start(sink).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;

    let mut broken = padded_frame();
    broken.planes.truncate(2);
    assert!(system.emit_frame(broken));
    wait_until(|| controller.frame_stats().dropped == 1).await;

    // The slot was released, so the stream continues
    assert!(system.emit_frame(padded_frame()));
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.width, 320);
    assert!(controller.is_running());
}

#[tokio::test]
async fn test_busy_slot_discards_frames() {
    let system = default_system();
    let controller = controller(&system);

    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel::<()>();
    let (release_tx, release_rx) = std_mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    let sink = move |frame: ExtractedFrame| {
        let _ = entered_tx.send(());
        let _ = release_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recv_timeout(WAIT);
        let _ = frames_tx.send(frame);
    };

    controller.start(Arc::new(sink)).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;

    assert!(system.emit_frame(padded_frame()));
    tokio::time::timeout(WAIT, entered_rx.recv()).await.unwrap();

    // First frame is inside the sink; the next one fills the slot
    assert!(system.emit_frame(padded_frame()));
    assert!(!system.emit_frame(padded_frame()));

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    next_frame(&mut frames).await;
    next_frame(&mut frames).await;
    wait_until(|| controller.frame_stats().delivered == 2).await;

    let stats = controller.frame_stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.produced, 2);
}

#[tokio::test]
async fn test_frames_after_stop_are_not_delivered() {
    let system = default_system();
    let controller = controller(&system);
    let (sink, mut frames) = channel_sink();

    controller.start(sink).unwrap();
    wait_for_state(&controller, LifecycleState::Running).await;
    controller.stop();

    assert!(!system.emit_pattern_frame());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(frames.try_recv().is_err());
}

#[tokio::test]
async fn test_pattern_generator_streams() {
    let system = VirtualCameraSystem::demo(DisplayRotation::Rotation0, 60);
    let controller = controller(&system);
    let (sink, mut frames) = channel_sink();

    assert_eq!(controller.backend_type(), CameraBackendType::Virtual);
    controller.start(sink).unwrap();

    for _ in 0..3 {
        let frame = next_frame(&mut frames).await;
        assert_eq!((frame.width, frame.height), (320, 240));
        assert_eq!(frame.rotation_degrees, 90);
        assert!(frame.stride_y > frame.width);
    }
}

#[tokio::test]
async fn test_dropping_controller_releases_device() {
    let system = default_system();
    {
        let controller = controller(&system);
        let (sink, _frames) = channel_sink();
        controller.start(sink).unwrap();
        wait_for_state(&controller, LifecycleState::Running).await;
    }

    assert!(!system.is_streaming());
    assert_eq!(system.open_device_count(), 0);
}
