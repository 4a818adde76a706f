// SPDX-License-Identifier: GPL-3.0-only

//! Downstream consumers of extracted camera frames
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ frame thread │ ──▶ │  ChannelSink      │ ──▶ │ async task   │
//! │  (on_frame)  │     │  QrScanSink       │ ──▶ │ UrlStore     │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//!                               │
//!                               ▼
//!                      convert::to_rgb_image ──▶ PNG snapshot
//! ```
//!
//! # Modules
//!
//! - [`sink`]: the [`FrameSink`] trait and a bounded channel sink
//! - [`qr`]: QR code scanning with otpauth URL persistence
//! - [`convert`]: YUV 4:2:0 to upright RGB conversion

pub mod convert;
pub mod qr;
pub mod sink;

pub use convert::{ConvertError, to_rgb_image};
pub use qr::{QrScanSink, ScanEvent};
pub use sink::{ChannelSink, FrameSink};
