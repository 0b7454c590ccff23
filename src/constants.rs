// SPDX-License-Identifier: GPL-3.0-only

//! Stream layout and timing constants
//!
//! The stream layout is fixed at this layer: every physical device is
//! configured identically and consumers cannot pick another resolution.

use std::time::Duration;

/// Capture width for every sub-stream
pub const STREAM_WIDTH: u32 = 1920;

/// Capture height for every sub-stream
pub const STREAM_HEIGHT: u32 = 1080;

/// Capture framerate for every sub-stream
pub const STREAM_FPS: u32 = 15;

/// Logical sub-streams per physical device (color, IR left, IR right)
pub const SUB_STREAMS_PER_DEVICE: usize = 3;

/// Bounded wait for a device's next frame set
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Bounded wait for the acquisition worker to exit on shutdown
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How long incoming frames stay suppressed after a transient exposure push
pub const EXPOSURE_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// Exposure bounds assumed until the first exposure-capable sensor reports its range.
///
/// Matches the stereo module range of the D400 family (microseconds).
pub const EXPOSURE_SENTINEL_MIN: i32 = 1;
pub const EXPOSURE_SENTINEL_MAX: i32 = 165_000;

/// Exposure value held before hardware reports its own
pub const EXPOSURE_DEFAULT: i32 = 8_500;

/// Emit per-frame diagnostics only every Nth frame
pub const LOG_EVERY_N_FRAMES: u64 = 150;

/// Application information utilities
pub mod app_info {
    /// Version string produced by the build script
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_join_shorter_than_frame_wait() {
        // The worker may still be inside a frame wait when the join deadline hits;
        // shutdown must tolerate that instead of relying on ordering.
        assert!(STOP_JOIN_TIMEOUT < FRAME_WAIT_TIMEOUT);
    }

    #[test]
    fn test_default_exposure_within_sentinel_bounds() {
        assert!(EXPOSURE_DEFAULT >= EXPOSURE_SENTINEL_MIN);
        assert!(EXPOSURE_DEFAULT <= EXPOSURE_SENTINEL_MAX);
    }
}
