// SPDX-License-Identifier: GPL-3.0-only

//! Frame sinks forwarding extracted frames to async consumers

pub use crate::backends::camera::delivery::FrameSink;
use crate::backends::camera::types::ExtractedFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Sink forwarding frames into a bounded tokio channel
///
/// Never blocks the frame thread: when the channel is full the frame is
/// dropped and counted.
pub struct ChannelSink {
    tx: mpsc::Sender<ExtractedFrame>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExtractedFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Frames dropped because the receiver lagged or was gone
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSink for ChannelSink {
    fn on_frame(&self, frame: ExtractedFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(dropped, "Frame channel full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Frame receiver gone, dropping frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> ExtractedFrame {
        ExtractedFrame {
            plane_y: vec![tag],
            stride_y: 1,
            plane_u: vec![128],
            stride_u: 1,
            plane_v: vec![128],
            stride_v: 1,
            rotation_degrees: 0,
            width: 1,
            height: 1,
        }
    }

    #[tokio::test]
    async fn test_forwards_frames_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.on_frame(frame(1));
        sink.on_frame(frame(2));

        assert_eq!(rx.recv().await.unwrap().plane_y, vec![1]);
        assert_eq!(rx.recv().await.unwrap().plane_y, vec![2]);
    }

    #[test]
    fn test_full_channel_drops() {
        let (sink, _rx) = ChannelSink::new(1);
        sink.on_frame(frame(1));
        sink.on_frame(frame(2));

        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_closed_channel_drops() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        sink.on_frame(frame(1));

        assert_eq!(sink.dropped(), 1);
    }
}
