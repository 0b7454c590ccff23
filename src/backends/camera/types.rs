// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the camera backend seam

//! Shared types for camera backends

use crate::constants::{STREAM_FPS, STREAM_HEIGHT, STREAM_WIDTH};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Pixel format of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// BGR8 - 24-bit packed color (3 bytes per pixel)
    Bgr8,
    /// Y8 - 8-bit grayscale (1 byte per pixel), used by the infrared imagers
    Y8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Bgr8 => 3,
            PixelFormat::Y8 => 1,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Bgr8 => write!(f, "BGR8"),
            PixelFormat::Y8 => write!(f, "Y8"),
        }
    }
}

/// One of the three logical sub-streams of a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// RGB color imager
    Color,
    /// Left infrared imager of the stereo pair
    InfraredLeft,
    /// Right infrared imager of the stereo pair
    InfraredRight,
}

impl StreamKind {
    /// All sub-streams in slot order
    pub const ALL: [StreamKind; 3] = [
        StreamKind::Color,
        StreamKind::InfraredLeft,
        StreamKind::InfraredRight,
    ];

    /// Position within a device's group of slots (0=color, 1=IR left, 2=IR right).
    ///
    /// This is also the profile index the camera reports on every frame, so
    /// frames can be routed back to their slot without a lookup table.
    pub fn sub_stream_index(&self) -> usize {
        match self {
            StreamKind::Color => 0,
            StreamKind::InfraredLeft => 1,
            StreamKind::InfraredRight => 2,
        }
    }

    /// Inverse of [`StreamKind::sub_stream_index`]
    pub fn from_sub_stream_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_infrared(&self) -> bool {
        !matches!(self, StreamKind::Color)
    }

    pub fn is_left(&self) -> bool {
        matches!(self, StreamKind::InfraredLeft)
    }

    /// Native pixel format delivered for this sub-stream
    pub fn pixel_format(&self) -> PixelFormat {
        if self.is_infrared() {
            PixelFormat::Y8
        } else {
            PixelFormat::Bgr8
        }
    }

    /// Suffix used in device paths ("RGB", "IR_L", "IR_R")
    pub fn suffix(&self) -> &'static str {
        match self {
            StreamKind::Color => "RGB",
            StreamKind::InfraredLeft => "IR_L",
            StreamKind::InfraredRight => "IR_R",
        }
    }

    /// Parse a device path suffix
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.suffix() == suffix)
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Color => write!(f, "Color"),
            StreamKind::InfraredLeft => write!(f, "Infrared (left)"),
            StreamKind::InfraredRight => write!(f, "Infrared (right)"),
        }
    }
}

/// Requested configuration of one sub-stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl StreamProfile {
    /// The fixed profile for a sub-stream
    pub fn fixed(kind: StreamKind) -> Self {
        Self {
            kind,
            width: STREAM_WIDTH,
            height: STREAM_HEIGHT,
            fps: STREAM_FPS,
            format: kind.pixel_format(),
        }
    }

    /// Bytes in one tightly packed frame
    pub fn frame_size(&self) -> usize {
        (self.width * self.height * self.format.bytes_per_pixel()) as usize
    }
}

impl std::fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}x{} @ {}fps {}",
            self.kind, self.width, self.height, self.fps, self.format
        )
    }
}

/// Stream configuration bound to one physical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Serial number of the only device this configuration may open
    pub serial: String,
    pub profiles: Vec<StreamProfile>,
}

impl StreamConfig {
    /// Color + both infrared imagers at the fixed profile
    pub fn for_device(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            profiles: StreamKind::ALL.into_iter().map(StreamProfile::fixed).collect(),
        }
    }
}

/// Physical device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub name: String,
}

/// A single decoded frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Serial of the device that produced the frame
    pub serial: String,
    /// Profile index reported by the device (see [`StreamKind::sub_stream_index`])
    pub stream_index: usize,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Arc<[u8]>,
    /// Device-side frame counter
    pub frame_number: u64,
    pub captured_at: Instant,
}

/// Frames delivered together by one pipeline for one capture instant
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    pub frames: Vec<VideoFrame>,
}

impl FrameSet {
    pub fn new(frames: Vec<VideoFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl IntoIterator for FrameSet {
    type Item = VideoFrame;
    type IntoIter = std::vec::IntoIter<VideoFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

/// Sensor options the service touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorOption {
    /// IR emitter on/off (0 or 1)
    EmitterEnabled,
    /// Laser projector power (0 = off)
    LaserPower,
    /// Hardware auto-exposure on/off (0 or 1)
    EnableAutoExposure,
    /// Manual exposure value
    Exposure,
}

impl std::fmt::Display for SensorOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorOption::EmitterEnabled => write!(f, "emitter-enabled"),
            SensorOption::LaserPower => write!(f, "laser-power"),
            SensorOption::EnableAutoExposure => write!(f, "enable-auto-exposure"),
            SensorOption::Exposure => write!(f, "exposure"),
        }
    }
}

/// Valid range of a sensor option
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Camera runtime is not available on this system
    NotAvailable(String),
    /// Failed to open or configure a device
    InitializationFailed(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Sensor does not expose the requested option
    OptionNotSupported(SensorOption),
    /// Pipeline is not started (or was stopped while waiting)
    Closed,
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::OptionNotSupported(option) => {
                write!(f, "Sensor option not supported: {}", option)
            }
            BackendError::Closed => write!(f, "Pipeline is not running"),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_stream_index_round_trip() {
        for kind in StreamKind::ALL {
            assert_eq!(
                StreamKind::from_sub_stream_index(kind.sub_stream_index()),
                Some(kind)
            );
        }
        assert_eq!(StreamKind::from_sub_stream_index(3), None);
    }

    #[test]
    fn test_fixed_profiles() {
        let config = StreamConfig::for_device("123");
        assert_eq!(config.serial, "123");
        assert_eq!(config.profiles.len(), 3);

        let color = config.profiles[0];
        assert_eq!(color.kind, StreamKind::Color);
        assert_eq!((color.width, color.height, color.fps), (1920, 1080, 15));
        assert_eq!(color.format, PixelFormat::Bgr8);
        assert_eq!(color.frame_size(), 1920 * 1080 * 3);

        for ir in &config.profiles[1..] {
            assert!(ir.kind.is_infrared());
            assert_eq!(ir.format, PixelFormat::Y8);
            assert_eq!(ir.frame_size(), 1920 * 1080);
        }
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(StreamKind::from_suffix("RGB"), Some(StreamKind::Color));
        assert_eq!(StreamKind::from_suffix("IR_L"), Some(StreamKind::InfraredLeft));
        assert_eq!(StreamKind::from_suffix("IR_R"), Some(StreamKind::InfraredRight));
        assert_eq!(StreamKind::from_suffix("ir_l"), None);
        assert!(StreamKind::InfraredLeft.is_left());
        assert!(!StreamKind::InfraredRight.is_left());
    }
}
