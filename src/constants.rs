// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Application identity used for config and data directories
pub mod app {
    /// Directory name under the user config and data directories
    pub const DIR_NAME: &str = "camera-capture";

    /// Config file name inside the config directory
    pub const CONFIG_FILE: &str = "config.json";

    /// Persisted otpauth URL list file name inside the data directory
    pub const CODES_FILE: &str = "otpauth";

    /// Folder under the pictures directory for snapshots
    pub const SNAPSHOT_DIR: &str = "Camera";
}

/// Capture pipeline configuration
pub mod pipeline {
    /// Images the reader may hold at once (pending plus acquired)
    pub const MAX_IMAGES: usize = 1;

    /// Planes in a YUV 4:2:0 image
    pub const YUV_PLANES: usize = 3;

    /// Default name of the frame-processing thread
    pub const FRAME_THREAD_NAME: &str = "camera-frames";

    /// Default tracing filter when RUST_LOG is unset
    pub const DEFAULT_LOG_FILTER: &str = "warn";

    /// Frames buffered by a channel sink before new ones are dropped
    pub const CHANNEL_SINK_CAPACITY: usize = 4;
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// How often an idle frame loop re-checks its stop signal
    pub const FRAME_LOOP_POLL: Duration = Duration::from_millis(100);

    /// Delay before a simulated device callback fires
    pub const VIRTUAL_CALLBACK_DELAY: Duration = Duration::from_millis(5);

    /// Default frame rate of the virtual pattern generator
    pub const VIRTUAL_DEFAULT_FPS: u32 = 15;

    /// Default CLI wait for frames or codes, in seconds
    pub const CLI_DEFAULT_TIMEOUT_SECS: u64 = 10;
}

/// V4L2 specifics
pub mod v4l2 {
    /// Buffers requested for memory-mapped streaming
    pub const STREAM_BUFFERS: u32 = 4;

    /// FourCC of planar YUV 4:2:0 (I420)
    pub const YUV420_FOURCC: &[u8; 4] = b"YU12";

    /// Device node prefix scanned during enumeration
    pub const DEVICE_PREFIX: &str = "/dev/video";

    /// Highest device index probed
    pub const MAX_DEVICE_INDEX: u32 = 63;
}

/// Scanned-code handling
pub mod codes {
    /// Prefix identifying one-time-password provisioning URLs
    pub const OTPAUTH_PREFIX: &str = "otpauth://";

    /// Scanned codes buffered for the CLI before new ones are dropped
    pub const SCAN_CHANNEL_CAPACITY: usize = 8;
}
