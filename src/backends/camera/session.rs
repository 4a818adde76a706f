// SPDX-License-Identifier: GPL-3.0-only

//! Repeating capture request ownership for a configured session

use super::image_reader::OutputTarget;
use super::types::{BackendError, RequestTemplate};
use super::{CameraDevice, CaptureSession};
use tracing::{debug, info, warn};

/// Failure to start the repeating request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The device could not build a request from the template
    BuildRequest(BackendError),
    /// The session refused the repeating request
    Submit(BackendError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::BuildRequest(e) => write!(f, "Failed to build capture request: {}", e),
            SessionError::Submit(e) => write!(f, "Failed to submit repeating request: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

/// Owns a configured capture session with its single repeating request
///
/// The request is issued once in [`SessionController::engage`] and never
/// reissued. Dropping the controller closes the session.
pub struct SessionController {
    session: Option<Box<dyn CaptureSession>>,
}

impl SessionController {
    /// Issue one repeating preview request into `target`
    ///
    /// On failure the session is closed before returning.
    pub fn engage(
        device: &dyn CameraDevice,
        mut session: Box<dyn CaptureSession>,
        target: &OutputTarget,
    ) -> Result<Self, SessionError> {
        let mut request = match device.create_capture_request(RequestTemplate::Preview) {
            Ok(request) => request,
            Err(e) => {
                warn!(device = %device.id(), error = %e, "Capture request build failed");
                session.close();
                return Err(SessionError::BuildRequest(e));
            }
        };
        request.add_target(target.clone());

        debug!(
            device = %device.id(),
            template = request.template().code(),
            format = %target.format(),
            "Submitting repeating capture request"
        );

        if let Err(e) = session.set_repeating_request(request) {
            warn!(device = %device.id(), error = %e, "Repeating request rejected");
            session.close();
            return Err(SessionError::Submit(e));
        }

        info!(device = %device.id(), "Repeating preview request active");

        Ok(Self {
            session: Some(session),
        })
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Close the session; later calls do nothing
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Closing capture session");
            session.close();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::image_reader::ImageReader;
    use crate::backends::camera::types::{BackendResult, ImageFormat, StreamFormat};
    use crate::backends::camera::{CaptureRequest, SessionCallback};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        requests: Mutex<Vec<CaptureRequest>>,
        closes: AtomicUsize,
    }

    struct FakeSession {
        log: Arc<Log>,
        reject: bool,
    }

    impl CaptureSession for FakeSession {
        fn set_repeating_request(&mut self, request: CaptureRequest) -> BackendResult<()> {
            if self.reject {
                return Err(BackendError::InvalidRequest("rejected".into()));
            }
            self.log.requests.lock().unwrap().push(request);
            Ok(())
        }

        fn close(&mut self) {
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeDevice {
        fail_build: bool,
    }

    impl CameraDevice for FakeDevice {
        fn id(&self) -> &str {
            "fake"
        }

        fn create_capture_session(
            &mut self,
            _outputs: Vec<OutputTarget>,
            _callback: SessionCallback,
        ) -> BackendResult<()> {
            Ok(())
        }

        fn create_capture_request(&self, template: RequestTemplate) -> BackendResult<CaptureRequest> {
            if self.fail_build {
                return Err(BackendError::Closed);
            }
            Ok(CaptureRequest::new(template))
        }

        fn close(&mut self) {}
    }

    fn reader() -> ImageReader {
        ImageReader::new(StreamFormat::new(ImageFormat::Yuv420_888, 320, 240), 1)
    }

    #[test]
    fn test_engage_issues_one_preview_request() {
        let log = Arc::new(Log::default());
        let reader = reader();
        let session = Box::new(FakeSession {
            log: Arc::clone(&log),
            reject: false,
        });

        let controller =
            SessionController::engage(&FakeDevice { fail_build: false }, session, &reader.surface())
                .unwrap();

        let requests = log.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].template(), RequestTemplate::Preview);
        assert_eq!(requests[0].targets().len(), 1);
        assert!(requests[0].targets()[0].same_surface(&reader.surface()));
        assert!(controller.is_open());
    }

    #[test]
    fn test_rejected_request_closes_session() {
        let log = Arc::new(Log::default());
        let session = Box::new(FakeSession {
            log: Arc::clone(&log),
            reject: true,
        });

        let result =
            SessionController::engage(&FakeDevice { fail_build: false }, session, &reader().surface());

        assert!(matches!(result, Err(SessionError::Submit(_))));
        assert_eq!(log.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_build_failure_closes_session() {
        let log = Arc::new(Log::default());
        let session = Box::new(FakeSession {
            log: Arc::clone(&log),
            reject: false,
        });

        let result =
            SessionController::engage(&FakeDevice { fail_build: true }, session, &reader().surface());

        assert!(matches!(result, Err(SessionError::BuildRequest(_))));
        assert!(log.requests.lock().unwrap().is_empty());
        assert_eq!(log.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let log = Arc::new(Log::default());
        let session = Box::new(FakeSession {
            log: Arc::clone(&log),
            reject: false,
        });
        let mut controller =
            SessionController::engage(&FakeDevice { fail_build: false }, session, &reader().surface())
                .unwrap();

        controller.close();
        controller.close();
        drop(controller);

        assert_eq!(log.closes.load(Ordering::SeqCst), 1);
    }
}
