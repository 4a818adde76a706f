// SPDX-License-Identifier: GPL-3.0-only

//! QR code scanning sink
//!
//! Looks for QR codes in the luma plane of every delivered frame using the
//! rqrr crate. Decoded `otpauth://` URLs are persisted in a [`UrlStore`] and
//! reported on a channel; anything else is ignored.
//!
//! Detection runs synchronously on the frame thread. While a frame is being
//! scanned the reader slot stays free, so newer frames are simply discarded
//! by the producer instead of piling up.

use super::sink::FrameSink;
use crate::backends::camera::types::ExtractedFrame;
use crate::constants::codes;
use crate::storage::UrlStore;
use rqrr::PreparedImage;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// A scanned otpauth URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub url: String,
    /// False when the URL was already in the store
    pub newly_stored: bool,
}

/// Decode every QR code visible in the frame's luma plane
///
/// Rotation is ignored; rqrr reads codes in any quarter-turn orientation.
pub fn decode_qr(frame: &ExtractedFrame) -> Vec<String> {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let stride = frame.stride_y as usize;
    if width == 0 || height == 0 || stride < width {
        return Vec::new();
    }
    let needed = stride * (height - 1) + width;
    if frame.plane_y.len() < needed {
        warn!(
            len = frame.plane_y.len(),
            needed, "Luma plane too short for QR detection"
        );
        return Vec::new();
    }

    let mut prepared =
        PreparedImage::prepare_from_greyscale(width, height, |x, y| frame.plane_y[y * stride + x]);

    let mut decoded = Vec::new();
    for grid in prepared.detect_grids() {
        match grid.decode() {
            Ok((_, content)) => decoded.push(content),
            Err(e) => debug!(error = %e, "Unable to read possible QR code"),
        }
    }

    if !decoded.is_empty() {
        trace!(count = decoded.len(), "Decoded QR codes");
    }
    decoded
}

/// Whether a decoded text is a one-time-password provisioning URL
pub fn is_otpauth(text: &str) -> bool {
    text.starts_with(codes::OTPAUTH_PREFIX)
}

/// Sink that stores scanned otpauth URLs
pub struct QrScanSink {
    store: UrlStore,
    tx: mpsc::Sender<ScanEvent>,
}

impl QrScanSink {
    /// Create a sink and the receiver of its scan events
    pub fn new(store: UrlStore) -> (Self, mpsc::Receiver<ScanEvent>) {
        let (tx, rx) = mpsc::channel(codes::SCAN_CHANNEL_CAPACITY);
        (Self { store, tx }, rx)
    }

    /// Persist and report decoded texts
    pub fn handle_decoded(&self, texts: Vec<String>) {
        for text in texts {
            if !is_otpauth(&text) {
                debug!("Ignoring QR code that is not an otpauth URL");
                continue;
            }

            let newly_stored = match self.store.contains(&text) {
                Ok(true) => false,
                Ok(false) => match self.store.add(&text) {
                    Ok(()) => {
                        info!(path = %self.store.path().display(), "Stored scanned otpauth URL");
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to store scanned URL");
                        false
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Failed to read URL store");
                    false
                }
            };

            if self
                .tx
                .try_send(ScanEvent {
                    url: text,
                    newly_stored,
                })
                .is_err()
            {
                trace!("Scan event channel full or closed");
            }
        }
    }
}

impl FrameSink for QrScanSink {
    fn on_frame(&self, frame: ExtractedFrame) {
        let texts = decode_qr(&frame);
        if !texts.is_empty() {
            self.handle_decoded(texts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_frame() -> ExtractedFrame {
        ExtractedFrame {
            plane_y: vec![255; 64 * 48],
            stride_y: 64,
            plane_u: vec![128; 32 * 24],
            stride_u: 32,
            plane_v: vec![128; 32 * 24],
            stride_v: 32,
            rotation_degrees: 90,
            width: 60,
            height: 48,
        }
    }

    #[test]
    fn test_blank_frame_has_no_codes() {
        assert!(decode_qr(&blank_frame()).is_empty());
    }

    #[test]
    fn test_short_luma_is_ignored() {
        let mut frame = blank_frame();
        frame.plane_y.truncate(100);
        assert!(decode_qr(&frame).is_empty());
    }

    #[test]
    fn test_otpauth_prefix() {
        assert!(is_otpauth("otpauth://totp/Example:alice?secret=JBSWY3DPEHPK3PXP"));
        assert!(!is_otpauth("https://example.com"));
        assert!(!is_otpauth("OTPAUTH://totp/x"));
    }
}
