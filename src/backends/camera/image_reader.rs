// SPDX-License-Identifier: GPL-3.0-only

//! Bounded image reader shared between a camera backend and the pipeline
//!
//! The reader is the capture surface a session streams into. It holds at most
//! `max_images` outstanding images (pending plus acquired). While that budget
//! is used up, newly produced images are discarded on the producer side
//! instead of queueing, so a slow consumer never builds up latency.
//!
//! ```text
//!  backend thread                     frame thread
//!  OutputTarget::offer ──► [slot] ──► ImageReader::acquire_next_image
//!        │                                   │
//!        └── listener() wakes consumer       └── Image dropped = slot released
//! ```

use super::types::StreamFormat;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Callback invoked (on the producer thread) when an image becomes available
pub type ImageListener = Arc<dyn Fn() + Send + Sync>;

/// Image acquisition and extraction errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The reader was closed
    ReaderClosed,
    /// All image slots are currently acquired
    MaxImagesAcquired,
    /// The image carries fewer planes than its format requires
    MissingPlanes { expected: usize, found: usize },
    /// A plane that must be planar has interleaved samples
    InterleavedPlane { plane: usize, pixel_stride: u32 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::ReaderClosed => write!(f, "Image reader closed"),
            FrameError::MaxImagesAcquired => write!(f, "Maximum number of images acquired"),
            FrameError::MissingPlanes { expected, found } => {
                write!(f, "Expected {} planes, found {}", expected, found)
            }
            FrameError::InterleavedPlane {
                plane,
                pixel_stride,
            } => write!(f, "Plane {} has pixel stride {}, expected 1", plane, pixel_stride),
        }
    }
}

impl std::error::Error for FrameError {}

/// One plane of a produced image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneData {
    data: Vec<u8>,
    row_stride: u32,
    pixel_stride: u32,
}

impl PlaneData {
    pub fn new(data: Vec<u8>, row_stride: u32, pixel_stride: u32) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Valid bytes of the plane
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn row_stride(&self) -> u32 {
        self.row_stride
    }

    pub fn pixel_stride(&self) -> u32 {
        self.pixel_stride
    }
}

/// Image contents handed to a reader by a producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub planes: Vec<PlaneData>,
    /// Sensor timestamp in nanoseconds
    pub timestamp_ns: u64,
}

struct ReaderState {
    pending: Option<ImageData>,
    acquired: usize,
    closed: bool,
    listener: Option<ImageListener>,
}

struct ReaderShared {
    format: StreamFormat,
    max_images: usize,
    state: Mutex<ReaderState>,
    produced: AtomicU64,
    discarded: AtomicU64,
}

impl ReaderShared {
    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self) {
        let mut state = self.lock();
        state.acquired = state.acquired.saturating_sub(1);
    }
}

/// Producer-side counters of an [`ImageReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderCounts {
    /// Images accepted into the slot
    pub produced: u64,
    /// Images dropped because every slot was in use
    pub discarded: u64,
}

/// Consumer side of a bounded capture surface
pub struct ImageReader {
    shared: Arc<ReaderShared>,
}

impl ImageReader {
    /// Create a reader for `format` holding at most `max_images` outstanding images
    pub fn new(format: StreamFormat, max_images: usize) -> Self {
        debug!(format = %format, max_images, "Creating image reader");

        Self {
            shared: Arc::new(ReaderShared {
                format,
                max_images: max_images.max(1),
                state: Mutex::new(ReaderState {
                    pending: None,
                    acquired: 0,
                    closed: false,
                    listener: None,
                }),
                produced: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Register the image-available listener, replacing any previous one
    pub fn set_listener(&self, listener: ImageListener) {
        self.shared.lock().listener = Some(listener);
    }

    /// Surface that a capture session streams into
    pub fn surface(&self) -> OutputTarget {
        OutputTarget {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.format
    }

    /// Take the next available image, if any
    ///
    /// The returned [`Image`] occupies a slot until it is dropped.
    pub fn acquire_next_image(&self) -> Result<Option<Image>, FrameError> {
        let mut state = self.shared.lock();

        if state.closed {
            return Err(FrameError::ReaderClosed);
        }
        if state.acquired >= self.shared.max_images {
            return Err(FrameError::MaxImagesAcquired);
        }

        let Some(data) = state.pending.take() else {
            return Ok(None);
        };
        state.acquired += 1;

        Ok(Some(Image {
            data,
            format: self.shared.format,
            shared: Arc::clone(&self.shared),
        }))
    }

    /// Producer-side counters since creation
    pub fn counts(&self) -> ReaderCounts {
        ReaderCounts {
            produced: self.shared.produced.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Close the reader, dropping any pending image and the listener
    ///
    /// Images already acquired stay valid until dropped.
    pub fn close(&self) {
        let listener = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending = None;
            state.listener.take()
        };
        // Dropped outside the lock; the listener may own channel endpoints
        drop(listener);
        debug!(format = %self.shared.format, "Image reader closed");
    }
}

impl Drop for ImageReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ImageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageReader")
            .field("format", &self.shared.format)
            .field("max_images", &self.shared.max_images)
            .finish()
    }
}

/// Producer side of an image reader (the capture surface)
#[derive(Clone)]
pub struct OutputTarget {
    shared: Arc<ReaderShared>,
}

impl OutputTarget {
    pub fn format(&self) -> StreamFormat {
        self.shared.format
    }

    /// Check whether two targets refer to the same reader
    pub fn same_surface(&self, other: &OutputTarget) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Offer a produced image to the reader
    ///
    /// Returns `false` when the image was discarded because the reader is
    /// closed or every slot is occupied. On acceptance the listener runs on
    /// the calling thread.
    pub fn offer(&self, data: ImageData) -> bool {
        let listener = {
            let mut state = self.shared.lock();
            if state.closed {
                return false;
            }
            let outstanding = usize::from(state.pending.is_some()) + state.acquired;
            if outstanding >= self.shared.max_images {
                drop(state);
                let discarded = self.shared.discarded.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(discarded, "Image slot busy, discarding frame");
                return false;
            }
            state.pending = Some(data);
            state.listener.clone()
        };

        self.shared.produced.fetch_add(1, Ordering::Relaxed);
        if let Some(listener) = listener {
            listener();
        }
        true
    }
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("format", &self.shared.format)
            .finish()
    }
}

/// An acquired image; dropping it releases the reader slot
pub struct Image {
    data: ImageData,
    format: StreamFormat,
    shared: Arc<ReaderShared>,
}

impl Image {
    pub fn planes(&self) -> &[PlaneData] {
        &self.data.planes
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width()
    }

    pub fn height(&self) -> u32 {
        self.format.height()
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.data.timestamp_ns
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("format", &self.format)
            .field("planes", &self.data.planes.len())
            .field("timestamp_ns", &self.data.timestamp_ns)
            .finish()
    }
}
