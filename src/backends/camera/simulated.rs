// SPDX-License-Identifier: GPL-3.0-only

//! Simulated depth camera backend
//!
//! Stands in for the camera runtime when no hardware is attached: the CLI uses
//! it to exercise the streaming service, and the tests use it to inject frame
//! sets and failures deterministically.
//!
//! Every simulated device has a stereo module (emitter, laser, auto-exposure,
//! exposure 1..165000) and an RGB module (auto-exposure, exposure 1..10000).
//! Pipelines count their start/stop calls so callers can verify that a device
//! is opened exactly once.

use super::types::*;
use super::{CapturePipeline, DeviceContext, Sensor};
use crate::constants::LOG_EVERY_N_FRAMES;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Serial prefix of simulated devices
pub const SIMULATED_SERIAL_PREFIX: &str = "SIM";

/// Frame sets buffered per pipeline before the oldest is dropped
const MAX_QUEUED_FRAME_SETS: usize = 4;

const STEREO_EXPOSURE_RANGE: OptionRange = OptionRange {
    min: 1.0,
    max: 165_000.0,
    step: 1.0,
    default: 8_500.0,
};

const RGB_EXPOSURE_RANGE: OptionRange = OptionRange {
    min: 1.0,
    max: 10_000.0,
    step: 1.0,
    default: 166.0,
};

const TOGGLE_RANGE: OptionRange = OptionRange {
    min: 0.0,
    max: 1.0,
    step: 1.0,
    default: 1.0,
};

const LASER_POWER_RANGE: OptionRange = OptionRange {
    min: 0.0,
    max: 360.0,
    step: 30.0,
    default: 150.0,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Sensor
// =============================================================================

/// Simulated sensor module with an option table
pub struct SimulatedSensor {
    name: String,
    ranges: HashMap<SensorOption, OptionRange>,
    values: Mutex<HashMap<SensorOption, f32>>,
    /// Every successful write, in order
    writes: Mutex<Vec<(SensorOption, f32)>>,
    /// Option whose writes are rejected
    failing_option: Mutex<Option<SensorOption>>,
}

impl SimulatedSensor {
    fn new(name: &str, ranges: &[(SensorOption, OptionRange)]) -> Self {
        let ranges: HashMap<_, _> = ranges.iter().copied().collect();
        let values = ranges.iter().map(|(opt, r)| (*opt, r.default)).collect();
        Self {
            name: name.to_string(),
            ranges,
            values: Mutex::new(values),
            writes: Mutex::new(Vec::new()),
            failing_option: Mutex::new(None),
        }
    }

    /// Stereo module: emitter, laser projector, auto-exposure and exposure
    pub fn stereo_module() -> Self {
        Self::new(
            "Stereo Module",
            &[
                (SensorOption::EmitterEnabled, TOGGLE_RANGE),
                (SensorOption::LaserPower, LASER_POWER_RANGE),
                (SensorOption::EnableAutoExposure, TOGGLE_RANGE),
                (SensorOption::Exposure, STEREO_EXPOSURE_RANGE),
            ],
        )
    }

    /// RGB module: auto-exposure and exposure
    pub fn rgb_module() -> Self {
        Self::new(
            "RGB Camera",
            &[
                (SensorOption::EnableAutoExposure, TOGGLE_RANGE),
                (SensorOption::Exposure, RGB_EXPOSURE_RANGE),
            ],
        )
    }

    /// Reject every future write of `option`
    pub fn fail_writes_of(&self, option: SensorOption) {
        *lock(&self.failing_option) = Some(option);
    }

    /// Current value without going through the trait
    pub fn value(&self, option: SensorOption) -> Option<f32> {
        lock(&self.values).get(&option).copied()
    }

    /// All successful writes so far
    pub fn writes(&self) -> Vec<(SensorOption, f32)> {
        lock(&self.writes).clone()
    }

    /// Successful writes of one option
    pub fn writes_of(&self, option: SensorOption) -> Vec<f32> {
        lock(&self.writes)
            .iter()
            .filter(|(opt, _)| *opt == option)
            .map(|(_, value)| *value)
            .collect()
    }
}

impl Sensor for SimulatedSensor {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn supports(&self, option: SensorOption) -> bool {
        self.ranges.contains_key(&option)
    }

    fn option_range(&self, option: SensorOption) -> BackendResult<OptionRange> {
        self.ranges
            .get(&option)
            .copied()
            .ok_or(BackendError::OptionNotSupported(option))
    }

    fn get_option(&self, option: SensorOption) -> BackendResult<f32> {
        self.value(option)
            .ok_or(BackendError::OptionNotSupported(option))
    }

    fn set_option(&self, option: SensorOption, value: f32) -> BackendResult<()> {
        let range = self.option_range(option)?;

        if *lock(&self.failing_option) == Some(option) {
            return Err(BackendError::Other(format!(
                "{}: write of {} rejected",
                self.name, option
            )));
        }

        if value < range.min || value > range.max {
            return Err(BackendError::Other(format!(
                "{}: {} value {} outside [{}, {}]",
                self.name, option, value, range.min, range.max
            )));
        }

        lock(&self.values).insert(option, value);
        lock(&self.writes).push((option, value));
        Ok(())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

struct QueueState {
    started: bool,
    pending: VecDeque<FrameSet>,
}

/// Frame-set queue shared between a pipeline and its generator thread
struct FrameQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl FrameQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                started: false,
                pending: VecDeque::new(),
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue a frame set; returns false when the pipeline is not streaming
    fn push(&self, frames: FrameSet) -> bool {
        let mut state = lock(&self.state);
        if !state.started {
            return false;
        }
        if state.pending.len() >= MAX_QUEUED_FRAME_SETS {
            state.pending.pop_front();
        }
        state.pending.push_back(frames);
        self.ready.notify_all();
        true
    }

    fn wait(&self, timeout: Duration) -> BackendResult<Option<FrameSet>> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        loop {
            if !state.started {
                return Err(BackendError::Closed);
            }
            if let Some(frames) = state.pending.pop_front() {
                return Ok(Some(frames));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn set_started(&self, started: bool) {
        let mut state = lock(&self.state);
        state.started = started;
        state.pending.clear();
        // Wake a pending wait so it observes the stop
        self.ready.notify_all();
    }

    fn is_started(&self) -> bool {
        lock(&self.state).started
    }
}

struct FrameGenerator {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Simulated capture pipeline for one device
pub struct SimulatedPipeline {
    info: DeviceInfo,
    stereo: Arc<SimulatedSensor>,
    rgb: Arc<SimulatedSensor>,
    queue: Arc<FrameQueue>,
    generate_frames: bool,
    generator: Mutex<Option<FrameGenerator>>,
    frame_number: AtomicU64,
    start_count: AtomicU32,
    stop_count: AtomicU32,
    fail_start: AtomicBool,
}

impl SimulatedPipeline {
    fn new(info: DeviceInfo, generate_frames: bool) -> Self {
        Self {
            info,
            stereo: Arc::new(SimulatedSensor::stereo_module()),
            rgb: Arc::new(SimulatedSensor::rgb_module()),
            queue: Arc::new(FrameQueue::new()),
            generate_frames,
            generator: Mutex::new(None),
            frame_number: AtomicU64::new(0),
            start_count: AtomicU32::new(0),
            stop_count: AtomicU32::new(0),
            fail_start: AtomicBool::new(false),
        }
    }

    pub fn serial(&self) -> &str {
        &self.info.serial
    }

    pub fn stereo_sensor(&self) -> &Arc<SimulatedSensor> {
        &self.stereo
    }

    pub fn rgb_sensor(&self) -> &Arc<SimulatedSensor> {
        &self.rgb
    }

    /// Number of successful `start()` calls
    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of `stop()` calls that stopped a running pipeline
    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::SeqCst)
    }

    /// Make subsequent `start()` calls fail
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Queue a frame set as if the device had delivered it
    ///
    /// Returns false (and drops the set) when the pipeline is not streaming.
    pub fn inject(&self, frames: FrameSet) -> bool {
        self.queue.push(frames)
    }

    /// Build a single synthetic frame of this device
    pub fn synthetic_frame(&self, kind: StreamKind) -> VideoFrame {
        let number = self.frame_number.fetch_add(1, Ordering::Relaxed);
        synthetic_frame(&self.info.serial, kind, number)
    }

    /// Build a frame set containing all three sub-streams
    pub fn synthetic_frame_set(&self) -> FrameSet {
        let number = self.frame_number.fetch_add(1, Ordering::Relaxed);
        synthetic_frame_set(&self.info.serial, number)
    }

    fn start_generator(&self) {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let queue = Arc::clone(&self.queue);
        let serial = self.info.serial.clone();
        let interval = Duration::from_secs_f64(1.0 / f64::from(crate::constants::STREAM_FPS));

        let spawned = thread::Builder::new()
            .name(format!("sim-{}", serial))
            .spawn(move || {
                let mut number = 0u64;
                while running_clone.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    if !running_clone.load(Ordering::SeqCst) {
                        break;
                    }
                    if !queue.push(synthetic_frame_set(&serial, number)) {
                        break;
                    }
                    if number % LOG_EVERY_N_FRAMES == 0 {
                        debug!(serial = %serial, frame = number, "Simulated frame set generated");
                    }
                    number += 1;
                }
            });

        match spawned {
            Ok(handle) => *lock(&self.generator) = Some(FrameGenerator { running, handle }),
            Err(e) => {
                warn!(serial = %self.info.serial, error = %e, "Failed to spawn frame generator")
            }
        }
    }

    fn stop_generator(&self) {
        if let Some(generator) = lock(&self.generator).take() {
            generator.running.store(false, Ordering::SeqCst);
            if generator.handle.join().is_err() {
                warn!(serial = %self.info.serial, "Frame generator panicked");
            }
        }
    }
}

impl CapturePipeline for SimulatedPipeline {
    fn start(&self, config: &StreamConfig) -> BackendResult<Vec<Arc<dyn Sensor>>> {
        if config.serial != self.info.serial {
            return Err(BackendError::DeviceNotFound(format!(
                "pipeline for {} cannot open {}",
                self.info.serial, config.serial
            )));
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(BackendError::InitializationFailed(format!(
                "{}: device busy",
                self.info.serial
            )));
        }
        if self.queue.is_started() {
            return Err(BackendError::InitializationFailed(format!(
                "{}: already streaming",
                self.info.serial
            )));
        }

        for profile in &config.profiles {
            debug!(serial = %self.info.serial, profile = %profile, "Enabling simulated stream");
        }

        self.queue.set_started(true);
        self.start_count.fetch_add(1, Ordering::SeqCst);

        if self.generate_frames {
            self.start_generator();
        }

        info!(serial = %self.info.serial, "Simulated pipeline started");

        let sensors: Vec<Arc<dyn Sensor>> = vec![
            Arc::clone(&self.stereo) as Arc<dyn Sensor>,
            Arc::clone(&self.rgb) as Arc<dyn Sensor>,
        ];
        Ok(sensors)
    }

    fn wait_for_frames(&self, timeout: Duration) -> BackendResult<Option<FrameSet>> {
        self.queue.wait(timeout)
    }

    fn stop(&self) -> BackendResult<()> {
        if !self.queue.is_started() {
            return Err(BackendError::Closed);
        }
        self.queue.set_started(false);
        self.stop_generator();
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        info!(serial = %self.info.serial, "Simulated pipeline stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.queue.is_started()
    }
}

impl Drop for SimulatedPipeline {
    fn drop(&mut self) {
        self.queue.set_started(false);
        self.stop_generator();
    }
}

// =============================================================================
// Context
// =============================================================================

/// Simulated camera runtime
pub struct SimulatedContext {
    devices: Vec<DeviceInfo>,
    generate_frames: bool,
    fail_enumeration: AtomicBool,
    pipelines: Mutex<HashMap<String, Arc<SimulatedPipeline>>>,
}

impl SimulatedContext {
    /// Context with `count` devices named `SIM0000`, `SIM0001`, ...
    pub fn new(count: usize) -> Self {
        let devices = (0..count)
            .map(|i| DeviceInfo {
                serial: format!("{}{:04}", SIMULATED_SERIAL_PREFIX, i),
                name: "Intel RealSense D435 (simulated)".to_string(),
            })
            .collect();
        Self::with_devices(devices)
    }

    /// Context reporting exactly `devices`, in order
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            generate_frames: false,
            fail_enumeration: AtomicBool::new(false),
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    /// Let started pipelines produce frame sets at the stream framerate
    pub fn with_frame_generator(mut self, enabled: bool) -> Self {
        self.generate_frames = enabled;
        self
    }

    /// Make `query_devices` fail
    pub fn set_fail_enumeration(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Pipeline created for `serial`, if any
    pub fn pipeline(&self, serial: &str) -> Option<Arc<SimulatedPipeline>> {
        lock(&self.pipelines).get(serial).cloned()
    }
}

impl DeviceContext for SimulatedContext {
    fn backend_name(&self) -> &'static str {
        "simulated"
    }

    fn query_devices(&self) -> BackendResult<Vec<DeviceInfo>> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(BackendError::NotAvailable(
                "simulated enumeration failure".to_string(),
            ));
        }
        Ok(self.devices.clone())
    }

    fn create_pipeline(&self, device: &DeviceInfo) -> BackendResult<Arc<dyn CapturePipeline>> {
        if !self.devices.iter().any(|d| d.serial == device.serial) {
            return Err(BackendError::DeviceNotFound(device.serial.clone()));
        }

        let pipeline = Arc::new(SimulatedPipeline::new(device.clone(), self.generate_frames));
        lock(&self.pipelines).insert(device.serial.clone(), Arc::clone(&pipeline));
        Ok(pipeline)
    }
}

// =============================================================================
// Synthetic frames
// =============================================================================

/// Full-size frame filled with a value derived from the frame number
pub fn synthetic_frame(serial: &str, kind: StreamKind, frame_number: u64) -> VideoFrame {
    let profile = StreamProfile::fixed(kind);
    let fill = (frame_number % 256) as u8;
    let data: Arc<[u8]> = vec![fill; profile.frame_size()].into();

    VideoFrame {
        serial: serial.to_string(),
        stream_index: kind.sub_stream_index(),
        width: profile.width,
        height: profile.height,
        stride: profile.width * profile.format.bytes_per_pixel(),
        format: profile.format,
        data,
        frame_number,
        captured_at: Instant::now(),
    }
}

/// Frame set with color, IR left and IR right for one capture instant
pub fn synthetic_frame_set(serial: &str, frame_number: u64) -> FrameSet {
    FrameSet::new(
        StreamKind::ALL
            .into_iter()
            .map(|kind| synthetic_frame(serial, kind, frame_number))
            .collect(),
    )
}
