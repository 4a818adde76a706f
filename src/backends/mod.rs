// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera capture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            CLI / frame sinks                │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                  │
//! │  ┌──────────────────────────────────────┐   │
//! │  │          CaptureController           │   │
//! │  └──────────────────┬───────────────────┘   │
//! │        ┌────────────┴────────────┐          │
//! │  ┌─────┴──────┐          ┌───────┴──────┐   │
//! │  │  Virtual   │          │     V4L2     │   │
//! │  └────────────┘          └──────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Camera subsystem traits, controller and backends

pub mod camera;
