// SPDX-License-Identifier: GPL-3.0-only

#![cfg(feature = "realsense")]

//! librealsense2 backend
//!
//! Drives attached RealSense cameras through `realsense_rust`. Each device
//! gets its own pipeline whose configuration is pinned to the device serial,
//! so several cameras can stream side by side from one context.
//!
//! Waiting and stopping share the pipeline lock: librealsense cannot cancel a
//! wait in flight, so `stop()` returns once the pending wait has timed out or
//! delivered its frames.

use super::types::*;
use super::{CapturePipeline, DeviceContext, Sensor};
use realsense_rust::{
    config::Config,
    context::Context,
    frame::{ColorFrame, FrameEx, InfraredFrame},
    kind::{Rs2CameraInfo, Rs2Format, Rs2Option, Rs2StreamKind},
    pipeline::{ActivePipeline, FrameWaitError, InactivePipeline},
    sensor::Sensor as Rs2Sensor,
};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FALLBACK_DEVICE_NAME: &str = "Intel RealSense";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn info_string(info: Option<&CStr>) -> Option<String> {
    info.map(|value| value.to_string_lossy().into_owned())
}

/// librealsense option for a service option
pub fn rs2_option(option: SensorOption) -> Rs2Option {
    match option {
        SensorOption::EmitterEnabled => Rs2Option::EmitterEnabled,
        SensorOption::LaserPower => Rs2Option::LaserPower,
        SensorOption::EnableAutoExposure => Rs2Option::EnableAutoExposure,
        SensorOption::Exposure => Rs2Option::Exposure,
    }
}

/// librealsense stream kind and index for a sub-stream
///
/// Infrared imagers are addressed by index (1 = left, 2 = right); the color
/// stream is left to the default index.
pub fn rs2_stream(kind: StreamKind) -> (Rs2StreamKind, Option<usize>) {
    match kind {
        StreamKind::Color => (Rs2StreamKind::Color, None),
        StreamKind::InfraredLeft | StreamKind::InfraredRight => {
            (Rs2StreamKind::Infrared, Some(kind.sub_stream_index()))
        }
    }
}

pub fn rs2_format(format: PixelFormat) -> Rs2Format {
    match format {
        PixelFormat::Bgr8 => Rs2Format::Bgr8,
        PixelFormat::Y8 => Rs2Format::Y8,
    }
}

/// Sub-stream of an infrared frame, from the profile index it carries
pub fn infrared_kind(index: usize) -> Option<StreamKind> {
    StreamKind::from_sub_stream_index(index).filter(StreamKind::is_infrared)
}

// =============================================================================
// Sensor
// =============================================================================

/// One sensor module of an opened device
pub struct RealsenseSensor {
    name: String,
    inner: Mutex<Rs2Sensor>,
}

impl RealsenseSensor {
    fn new(sensor: Rs2Sensor) -> Self {
        let name = info_string(sensor.info(Rs2CameraInfo::Name))
            .unwrap_or_else(|| "sensor".to_string());
        Self {
            name,
            inner: Mutex::new(sensor),
        }
    }
}

impl Sensor for RealsenseSensor {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn supports(&self, option: SensorOption) -> bool {
        lock(&self.inner).supports_option(rs2_option(option))
    }

    fn option_range(&self, option: SensorOption) -> BackendResult<OptionRange> {
        lock(&self.inner)
            .get_option_range(rs2_option(option))
            .map(|range| OptionRange {
                min: range.min,
                max: range.max,
                step: range.step,
                default: range.default,
            })
            .ok_or(BackendError::OptionNotSupported(option))
    }

    fn get_option(&self, option: SensorOption) -> BackendResult<f32> {
        lock(&self.inner)
            .get_option(rs2_option(option))
            .ok_or(BackendError::OptionNotSupported(option))
    }

    fn set_option(&self, option: SensorOption, value: f32) -> BackendResult<()> {
        lock(&self.inner)
            .set_option(rs2_option(option), value)
            .map_err(|e| BackendError::Other(format!("{} on {}: {}", option, self.name, e)))
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Pipeline bound to one physical camera
pub struct RealsensePipeline {
    info: DeviceInfo,
    context: Arc<Mutex<Context>>,
    active: Mutex<Option<ActivePipeline>>,
    started: AtomicBool,
    /// Frames delivered per sub-stream, used as the frame number
    frame_counters: [AtomicU64; 3],
}

impl RealsensePipeline {
    fn new(info: DeviceInfo, context: Arc<Mutex<Context>>) -> Self {
        Self {
            info,
            context,
            active: Mutex::new(None),
            started: AtomicBool::new(false),
            frame_counters: Default::default(),
        }
    }

    fn build_config(&self, config: &StreamConfig) -> BackendResult<Config> {
        let init_err = |e: &dyn std::fmt::Display| {
            BackendError::InitializationFailed(format!("{}: {}", self.info.serial, e))
        };

        let serial = CString::new(config.serial.as_str()).map_err(|e| init_err(&e))?;
        let mut rs_config = Config::new();
        rs_config
            .enable_device_from_serial(&serial)
            .map_err(|e| init_err(&e))?
            .disable_all_streams()
            .map_err(|e| init_err(&e))?;

        for profile in &config.profiles {
            let (kind, index) = rs2_stream(profile.kind);
            debug!(serial = %self.info.serial, profile = %profile, "Enabling stream");
            rs_config
                .enable_stream(
                    kind,
                    index,
                    profile.width as usize,
                    profile.height as usize,
                    rs2_format(profile.format),
                    profile.fps as usize,
                )
                .map_err(|e| init_err(&e))?;
        }
        Ok(rs_config)
    }

    fn video_frame(
        &self,
        kind: StreamKind,
        (width, height, stride): (usize, usize, usize),
        data: Arc<[u8]>,
        captured_at: Instant,
    ) -> VideoFrame {
        let index = kind.sub_stream_index();
        VideoFrame {
            serial: self.info.serial.clone(),
            stream_index: index,
            width: width as u32,
            height: height as u32,
            stride: stride as u32,
            format: kind.pixel_format(),
            data,
            frame_number: self.frame_counters[index].fetch_add(1, Ordering::Relaxed),
            captured_at,
        }
    }
}

/// Copy the pixel buffer out of a librealsense frame
///
/// # Safety
/// `data` must point to at least `size` readable bytes, as returned by
/// `get_data()` and `get_data_size()` of the same frame.
unsafe fn copy_pixels(data: &std::os::raw::c_void, size: usize) -> Arc<[u8]> {
    let ptr: *const _ = data;
    let ptr: *const u8 = ptr.cast();
    unsafe { std::slice::from_raw_parts(ptr, size) }.into()
}

impl CapturePipeline for RealsensePipeline {
    fn start(&self, config: &StreamConfig) -> BackendResult<Vec<Arc<dyn Sensor>>> {
        if config.serial != self.info.serial {
            return Err(BackendError::DeviceNotFound(format!(
                "pipeline for {} cannot open {}",
                self.info.serial, config.serial
            )));
        }

        let mut active = lock(&self.active);
        if active.is_some() {
            return Err(BackendError::InitializationFailed(format!(
                "{}: already streaming",
                self.info.serial
            )));
        }

        let rs_config = self.build_config(config)?;
        let inactive = InactivePipeline::try_from(&*lock(&self.context)).map_err(|e| {
            BackendError::InitializationFailed(format!("{}: {}", self.info.serial, e))
        })?;
        let pipeline = inactive.start(Some(rs_config)).map_err(|e| {
            BackendError::InitializationFailed(format!("{}: {}", self.info.serial, e))
        })?;

        let sensors: Vec<Arc<dyn Sensor>> = pipeline
            .profile()
            .device()
            .sensors()
            .into_iter()
            .map(|sensor| Arc::new(RealsenseSensor::new(sensor)) as Arc<dyn Sensor>)
            .collect();

        *active = Some(pipeline);
        self.started.store(true, Ordering::SeqCst);
        info!(serial = %self.info.serial, sensors = sensors.len(), "Pipeline started");
        Ok(sensors)
    }

    fn wait_for_frames(&self, timeout: Duration) -> BackendResult<Option<FrameSet>> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }

        let mut active = lock(&self.active);
        let Some(pipeline) = active.as_mut() else {
            return Err(BackendError::Closed);
        };

        let composite = match pipeline.wait(Some(timeout)) {
            Ok(composite) => composite,
            Err(FrameWaitError::DidTimeoutBeforeFrameArrival) => return Ok(None),
            Err(e) => return Err(BackendError::Other(format!("{}: {}", self.info.serial, e))),
        };
        drop(active);

        let captured_at = Instant::now();
        let mut frames = Vec::with_capacity(3);

        for frame in composite.frames_of_type::<ColorFrame>() {
            let data = unsafe { copy_pixels(frame.get_data(), frame.get_data_size()) };
            let dims = (frame.width(), frame.height(), frame.stride());
            frames.push(self.video_frame(StreamKind::Color, dims, data, captured_at));
        }

        for frame in composite.frames_of_type::<InfraredFrame>() {
            let index = frame.stream_profile().index();
            let Some(kind) = infrared_kind(index) else {
                debug!(serial = %self.info.serial, index, "Ignoring infrared frame");
                continue;
            };
            let data = unsafe { copy_pixels(frame.get_data(), frame.get_data_size()) };
            let dims = (frame.width(), frame.height(), frame.stride());
            frames.push(self.video_frame(kind, dims, data, captured_at));
        }

        Ok(Some(FrameSet::new(frames)))
    }

    fn stop(&self) -> BackendResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        // Blocks until a pending wait returns
        if let Some(pipeline) = lock(&self.active).take() {
            drop(pipeline.stop());
        }
        info!(serial = %self.info.serial, "Pipeline stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Drop for RealsensePipeline {
    fn drop(&mut self) {
        self.started.store(false, Ordering::SeqCst);
        if let Some(pipeline) = lock(&self.active).take() {
            drop(pipeline.stop());
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// librealsense2 runtime shared by every pipeline it creates
pub struct RealsenseContext {
    context: Arc<Mutex<Context>>,
}

impl RealsenseContext {
    pub fn new() -> BackendResult<Self> {
        let context = Context::new().map_err(|e| BackendError::NotAvailable(e.to_string()))?;
        Ok(Self {
            context: Arc::new(Mutex::new(context)),
        })
    }
}

impl DeviceContext for RealsenseContext {
    fn backend_name(&self) -> &'static str {
        "realsense"
    }

    fn query_devices(&self) -> BackendResult<Vec<DeviceInfo>> {
        let devices = lock(&self.context).query_devices(HashSet::new());

        let mut found = Vec::with_capacity(devices.len());
        for device in &devices {
            let Some(serial) = info_string(device.info(Rs2CameraInfo::SerialNumber)) else {
                warn!("Skipping device without serial number");
                continue;
            };
            let name = info_string(device.info(Rs2CameraInfo::Name))
                .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string());
            debug!(serial = %serial, name = %name, "Found device");
            found.push(DeviceInfo { serial, name });
        }
        Ok(found)
    }

    fn create_pipeline(&self, device: &DeviceInfo) -> BackendResult<Arc<dyn CapturePipeline>> {
        Ok(Arc::new(RealsensePipeline::new(
            device.clone(),
            Arc::clone(&self.context),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_mapping() {
        assert!(matches!(
            rs2_option(SensorOption::EmitterEnabled),
            Rs2Option::EmitterEnabled
        ));
        assert!(matches!(rs2_option(SensorOption::LaserPower), Rs2Option::LaserPower));
        assert!(matches!(
            rs2_option(SensorOption::EnableAutoExposure),
            Rs2Option::EnableAutoExposure
        ));
        assert!(matches!(rs2_option(SensorOption::Exposure), Rs2Option::Exposure));
    }

    #[test]
    fn test_stream_mapping() {
        assert!(matches!(
            rs2_stream(StreamKind::Color),
            (Rs2StreamKind::Color, None)
        ));
        assert!(matches!(
            rs2_stream(StreamKind::InfraredLeft),
            (Rs2StreamKind::Infrared, Some(1))
        ));
        assert!(matches!(
            rs2_stream(StreamKind::InfraredRight),
            (Rs2StreamKind::Infrared, Some(2))
        ));
        assert!(matches!(rs2_format(PixelFormat::Bgr8), Rs2Format::Bgr8));
        assert!(matches!(rs2_format(PixelFormat::Y8), Rs2Format::Y8));
    }

    #[test]
    fn test_infrared_index_routing() {
        assert_eq!(infrared_kind(1), Some(StreamKind::InfraredLeft));
        assert_eq!(infrared_kind(2), Some(StreamKind::InfraredRight));
        assert_eq!(infrared_kind(0), None);
        assert_eq!(infrared_kind(3), None);
    }

    #[test]
    fn test_copy_pixels() {
        let bytes = [1u8, 2, 3, 4];
        let data = unsafe { &*(bytes.as_ptr() as *const std::os::raw::c_void) };
        let copied = unsafe { copy_pixels(data, bytes.len()) };
        assert_eq!(&copied[..], &bytes[..]);
    }
}
