// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! The streaming service never talks to a camera SDK directly. It goes through
//! three traits that mirror how depth cameras are driven:
//!
//! ```text
//! ┌─────────────────────┐
//! │  StreamingService   │  ← Lifecycle, demux, exposure
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │    DeviceContext    │  ← Enumeration, one pipeline per device
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CapturePipeline   │  ← Start/stop, bounded frame-set wait
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │       Sensor        │  ← Emitter, laser, exposure options
//! └─────────────────────┘
//! ```

pub mod frame_loop;
pub mod realsense;
pub mod simulated;
pub mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Duration;

/// A sensor module of an opened device (stereo module, RGB module, ...)
pub trait Sensor: Send + Sync {
    /// Human readable sensor name
    fn name(&self) -> String;

    /// Whether the sensor exposes `option`
    fn supports(&self, option: SensorOption) -> bool;

    /// Valid range of `option`
    fn option_range(&self, option: SensorOption) -> BackendResult<OptionRange>;

    /// Current value of `option`
    fn get_option(&self, option: SensorOption) -> BackendResult<f32>;

    /// Write `option`; the hardware may apply it a few frames later
    fn set_option(&self, option: SensorOption, value: f32) -> BackendResult<()>;
}

/// Capture pipeline bound to one physical device
///
/// All methods take `&self` so the acquisition worker can wait for frames while
/// another thread stops the pipeline; implementations must wake any pending
/// [`CapturePipeline::wait_for_frames`] when stopped.
pub trait CapturePipeline: Send + Sync {
    /// Open the device named by `config` and start streaming its profiles
    ///
    /// # Returns
    /// * `Ok(sensors)` - Sensors of the opened device, for option overrides
    /// * `Err(BackendError)` - The device could not be opened or configured
    fn start(&self, config: &StreamConfig) -> BackendResult<Vec<Arc<dyn Sensor>>>;

    /// Block until the next frame set arrives or `timeout` elapses
    ///
    /// # Returns
    /// * `Ok(Some(set))` - A frame set
    /// * `Ok(None)` - Timeout, no new data
    /// * `Err(BackendError::Closed)` - The pipeline is not running
    fn wait_for_frames(&self, timeout: Duration) -> BackendResult<Option<FrameSet>>;

    /// Stop streaming and close the device
    fn stop(&self) -> BackendResult<()>;

    /// Whether the pipeline is currently streaming
    fn is_started(&self) -> bool;
}

/// Entry point to a camera runtime
pub trait DeviceContext: Send + Sync {
    /// Backend identifier used in logs
    fn backend_name(&self) -> &'static str;

    /// Enumerate attached devices
    fn query_devices(&self) -> BackendResult<Vec<DeviceInfo>>;

    /// Create (but do not start) a pipeline for `device`
    fn create_pipeline(&self, device: &DeviceInfo) -> BackendResult<Arc<dyn CapturePipeline>>;
}
