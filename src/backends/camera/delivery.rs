// SPDX-License-Identifier: GPL-3.0-only

//! Frame extraction and delivery to the downstream sink
//!
//! Runs on the frame thread once per image-available notification. Plane
//! bytes are copied out of the acquired image and the image is released
//! before the sink sees the frame, so a slow sink never holds the reader slot.

use super::frame_loop::LoopAction;
use super::image_reader::{FrameError, Image, ImageReader, ReaderCounts};
use super::types::{ExtractedFrame, ImageFormat};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Downstream consumer of extracted frames
///
/// Called synchronously on the frame thread, one frame at a time.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: ExtractedFrame);
}

impl<F> FrameSink for F
where
    F: Fn(ExtractedFrame) + Send + Sync,
{
    fn on_frame(&self, frame: ExtractedFrame) {
        self(frame)
    }
}

/// Snapshot of frame pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Frames handed to the sink
    pub delivered: u64,
    /// Frames dropped because extraction failed
    pub dropped: u64,
    /// Notifications that found no frame to acquire
    pub spurious: u64,
    /// Frames the reader discarded because its slot was occupied
    pub discarded: u64,
    /// Frames the reader accepted from the camera
    pub produced: u64,
}

/// Live counters shared between the controller and the frame thread
#[derive(Debug, Default)]
pub struct FrameCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    spurious: AtomicU64,
}

impl FrameCounters {
    pub fn reset(&self) {
        self.delivered.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.spurious.store(0, Ordering::Relaxed);
    }

    /// Snapshot with the reader's producer-side counts filled in by the caller
    pub fn snapshot(&self, reader: ReaderCounts) -> FrameStats {
        FrameStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            spurious: self.spurious.load(Ordering::Relaxed),
            discarded: reader.discarded,
            produced: reader.produced,
        }
    }
}

/// What happened to one image-available notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Capture is not running; any pending image was released unseen
    NotRunning,
    Spurious,
    Dropped(FrameError),
    /// The reader is closed; no further frames will arrive
    Closed,
}

impl DeliveryOutcome {
    /// Frame loop action for this outcome
    pub fn loop_action(&self) -> LoopAction {
        match self {
            DeliveryOutcome::Closed => LoopAction::Stop,
            _ => LoopAction::Continue,
        }
    }
}

/// Copy plane data out of an acquired YUV 4:2:0 image
pub fn extract_planes(image: &Image, rotation_degrees: u32) -> Result<ExtractedFrame, FrameError> {
    let expected = ImageFormat::Yuv420_888.plane_count();
    let planes = image.planes();
    if planes.len() < expected {
        return Err(FrameError::MissingPlanes {
            expected,
            found: planes.len(),
        });
    }
    if let Some((plane, data)) = planes[..expected]
        .iter()
        .enumerate()
        .find(|(_, data)| data.pixel_stride() != 1)
    {
        return Err(FrameError::InterleavedPlane {
            plane,
            pixel_stride: data.pixel_stride(),
        });
    }

    Ok(ExtractedFrame {
        plane_y: planes[0].data().to_vec(),
        stride_y: planes[0].row_stride(),
        plane_u: planes[1].data().to_vec(),
        stride_u: planes[1].row_stride(),
        plane_v: planes[2].data().to_vec(),
        stride_v: planes[2].row_stride(),
        rotation_degrees,
        width: image.width(),
        height: image.height(),
    })
}

/// Per-cycle frame delivery state owned by the frame thread
pub struct FrameDelivery {
    reader: Arc<ImageReader>,
    sink: Arc<dyn FrameSink>,
    running: Arc<AtomicBool>,
    counters: Arc<FrameCounters>,
    rotation_degrees: u32,
}

impl FrameDelivery {
    pub fn new(
        reader: Arc<ImageReader>,
        sink: Arc<dyn FrameSink>,
        running: Arc<AtomicBool>,
        counters: Arc<FrameCounters>,
        rotation_degrees: u32,
    ) -> Self {
        Self {
            reader,
            sink,
            running,
            counters,
            rotation_degrees,
        }
    }

    /// Handle one image-available notification
    pub fn on_image_available(&self) -> DeliveryOutcome {
        let running = self.running.load(Ordering::SeqCst);

        let image = match self.reader.acquire_next_image() {
            Ok(Some(image)) => image,
            Ok(None) if !running => return DeliveryOutcome::NotRunning,
            Ok(None) => {
                self.counters.spurious.fetch_add(1, Ordering::Relaxed);
                trace!("Image-available notification without a frame");
                return DeliveryOutcome::Spurious;
            }
            Err(FrameError::ReaderClosed) => {
                debug!("Reader closed, frame delivery finished");
                return DeliveryOutcome::Closed;
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to acquire image");
                return DeliveryOutcome::Dropped(e);
            }
        };

        if !running {
            // Late notification; release the slot without delivering
            trace!("Capture not running, releasing image");
            drop(image);
            return DeliveryOutcome::NotRunning;
        }

        let extracted = extract_planes(&image, self.rotation_degrees);
        drop(image);

        match extracted {
            Ok(frame) => self.forward(frame),
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Camera produced an image violating the format contract");
                DeliveryOutcome::Dropped(e)
            }
        }
    }

    /// Hand an extracted frame to the sink unless capture stopped meanwhile
    fn forward(&self, frame: ExtractedFrame) -> DeliveryOutcome {
        if !self.running.load(Ordering::SeqCst) {
            trace!("Capture stopped during extraction, dropping frame");
            return DeliveryOutcome::NotRunning;
        }
        self.sink.on_frame(frame);
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        DeliveryOutcome::Delivered
    }
}
