// SPDX-License-Identifier: GPL-3.0-only

//! Orientation correction for delivered frames
//!
//! Sensors are often mounted at 90° or 270° relative to the device's natural
//! orientation. The correction combines that mounting angle with the screen
//! rotation sampled when the device is opened. Only rear-facing sensors are
//! handled; front cameras would additionally need mirroring.

use serde::{Deserialize, Serialize};

/// Clockwise rotation (degrees, `[0, 360)`) that makes a rear-camera image upright
pub fn rotation_correction(sensor_orientation: i32, screen_rotation: i32) -> u32 {
    (sensor_orientation.rem_euclid(360) + screen_rotation.rem_euclid(360)).rem_euclid(360) as u32
}

/// Current rotation of the display from its natural orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    /// Create from a degree value, snapping to the nearest quarter turn
    pub fn from_degrees(degrees: i32) -> Self {
        match ImageRotation::nearest(degrees) {
            ImageRotation::Deg0 => DisplayRotation::Rotation0,
            ImageRotation::Deg90 => DisplayRotation::Rotation90,
            ImageRotation::Deg180 => DisplayRotation::Rotation180,
            ImageRotation::Deg270 => DisplayRotation::Rotation270,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            DisplayRotation::Rotation0 => 0,
            DisplayRotation::Rotation90 => 90,
            DisplayRotation::Rotation180 => 180,
            DisplayRotation::Rotation270 => 270,
        }
    }
}

/// Quarter-turn rotation applied when rendering a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageRotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl ImageRotation {
    /// Snap an arbitrary angle to the closest quarter turn
    pub fn nearest(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            45..135 => ImageRotation::Deg90,
            135..225 => ImageRotation::Deg180,
            225..315 => ImageRotation::Deg270,
            // 0..45 and 315..360
            _ => ImageRotation::Deg0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            ImageRotation::Deg0 => 0,
            ImageRotation::Deg90 => 90,
            ImageRotation::Deg180 => 180,
            ImageRotation::Deg270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, ImageRotation::Deg90 | ImageRotation::Deg270)
    }

    /// Output dimensions after rotating a `width` x `height` image
    pub fn rotated_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

impl std::fmt::Display for ImageRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}
