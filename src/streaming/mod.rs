// SPDX-License-Identifier: GPL-3.0-only

//! Multi-device streaming service
//!
//! Exposes every enumerated depth camera as three logical streams (color,
//! infrared left, infrared right) and keeps the latest frame of each in a
//! slot table. A single acquisition thread polls all devices; it is started
//! by the first consumer and stopped when the last one releases its
//! reference.
//!
//! ```text
//! consumers ──start/stop──► StreamingService ──spawn/join──► acquisition thread
//!     ▲                           │                                 │
//!     │                      FrameTable ◄──────── demux ────────────┘
//!     └──── FrameReady{slot} ◄────┘
//! ```

mod acquisition;
pub mod devices;
pub mod exposure;
pub mod frame_table;
mod lease;
pub mod notify;
pub mod stats;

pub use devices::{DeviceTable, StreamDescriptor, StreamIdentity, logical_slot};
pub use exposure::ExposureState;
pub use lease::StreamLease;
pub use notify::{FrameReady, FrameReadyReceiver};
pub use stats::StreamStatistics;

use crate::backends::camera::frame_loop::{CaptureLoopController, JoinOutcome};
use crate::backends::camera::{
    CapturePipeline, DeviceContext, DeviceInfo, Sensor, StreamConfig, VideoFrame,
};
use crate::config::StreamingConfig;
use crate::errors::{StreamingError, StreamingResult};
use frame_table::FrameTable;
use notify::FrameNotifier;
use stats::AcquisitionCounters;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use tracing::{debug, info, warn};

/// Lifecycle of the acquisition loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    /// Never started
    Idle,
    /// Worker is opening and configuring devices
    Starting,
    /// Worker is polling devices
    Running,
    /// The last startup attempt failed; the next `start()` retries
    Failed(String),
    /// Stopped after running
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Starting => write!(f, "starting"),
            LoopState::Running => write!(f, "running"),
            LoopState::Failed(reason) => write!(f, "failed ({})", reason),
            LoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Result of releasing a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Other consumers still hold references; acquisition continues
    Released { remaining: usize },
    /// Last reference released, worker joined and devices closed
    Stopped,
    /// Last reference released, but the worker missed the join deadline.
    /// Devices were closed regardless.
    ///
    /// An idle worker only notices the stop once its frame wait returns. With
    /// the default timings (1000 ms wait, 500 ms join) stopping a device that
    /// delivers no frames therefore always ends here.
    StoppedUnclean,
}

impl StopOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, StopOutcome::StoppedUnclean)
    }
}

/// Lifecycle state guarded by the service lock
struct ServiceState {
    reference_count: usize,
    /// Cleared before the worker is joined
    started: bool,
    loop_state: LoopState,
    controller: Option<CaptureLoopController>,
    /// Sensors of the opened devices; empty while closed
    sensors: Vec<Arc<dyn Sensor>>,
    pipelines_open: bool,
    exposure: ExposureState,
    last_error: Option<StreamingError>,
}

/// State shared between the service handles and the acquisition thread
struct Shared {
    backend_name: &'static str,
    config: StreamingConfig,
    devices: DeviceTable,
    /// Indexed by device slot, like `configs`
    pipelines: Vec<Arc<dyn CapturePipeline>>,
    configs: Vec<StreamConfig>,
    frames: FrameTable,
    notifier: FrameNotifier,
    counters: AcquisitionCounters,
    /// Number of exposure changes in progress. While non-zero, incoming frame
    /// sets are dropped. Held for the whole demux of a frame set.
    skip_gate: Mutex<u32>,
    state: Mutex<ServiceState>,
    state_changed: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        lock(&self.state)
    }

    fn wait_while_starting<'a>(
        &self,
        mut state: MutexGuard<'a, ServiceState>,
    ) -> MutexGuard<'a, ServiceState> {
        while state.loop_state == LoopState::Starting {
            state = self
                .state_changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state
    }

    /// Stop every pipeline that is currently started
    fn close_pipelines(&self) {
        for (pipeline, config) in self.pipelines.iter().zip(&self.configs) {
            if !pipeline.is_started() {
                continue;
            }
            match pipeline.stop() {
                Ok(()) => debug!(serial = %config.serial, "Device closed"),
                Err(e) => warn!(serial = %config.serial, error = %e, "Failed to close device"),
            }
        }
    }

    /// Join the worker with a deadline, then close the devices
    fn stop_acquisition(&self, state: &mut ServiceState) -> StopOutcome {
        state.started = false;

        let join = match state.controller.take() {
            Some(mut controller) => controller.stop_with_timeout(self.config.stop_join_timeout()),
            None => JoinOutcome::NotRunning,
        };
        if !join.is_clean() {
            warn!(?join, "Acquisition worker did not exit cleanly, closing devices anyway");
        }

        self.close_pipelines();
        state.sensors.clear();
        state.pipelines_open = false;
        state.loop_state = LoopState::Stopped;
        self.state_changed.notify_all();

        info!("Acquisition stopped");
        if join.is_clean() {
            StopOutcome::Stopped
        } else {
            StopOutcome::StoppedUnclean
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(controller) = state.controller.take() {
            controller.request_stop();
        }
        self.close_pipelines();
    }
}

/// Keeps incoming frame sets dropped until released
struct SkipGuard<'a> {
    gate: &'a Mutex<u32>,
}

impl<'a> SkipGuard<'a> {
    fn engage(gate: &'a Mutex<u32>) -> Self {
        // Waits for an in-flight demux to finish before taking effect
        *lock(gate) += 1;
        Self { gate }
    }
}

impl Drop for SkipGuard<'_> {
    fn drop(&mut self) {
        let mut depth = lock(self.gate);
        *depth = depth.saturating_sub(1);
    }
}

/// Handle to the streaming service
///
/// Cheap to clone; all clones share the same devices, frame table and
/// reference count.
#[derive(Clone)]
pub struct StreamingService {
    shared: Arc<Shared>,
}

impl StreamingService {
    /// Enumerate devices and prepare one pipeline per device
    ///
    /// Enumeration failures are logged and leave the service with no
    /// devices. Devices are not opened until the first `start()`.
    pub fn new(context: &dyn DeviceContext, config: StreamingConfig) -> Self {
        let backend_name = context.backend_name();
        let enumerated = match context.query_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(backend = backend_name, error = %e, "Device enumeration failed, continuing without devices");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let mut usable = Vec::new();
        let mut pipelines = Vec::new();
        for device in enumerated {
            if !seen.insert(device.serial.clone()) {
                warn!(serial = %device.serial, "Duplicate device serial, skipping");
                continue;
            }
            match context.create_pipeline(&device) {
                Ok(pipeline) => {
                    pipelines.push(pipeline);
                    usable.push(device);
                }
                Err(e) => {
                    warn!(serial = %device.serial, error = %e, "Could not create pipeline, skipping device");
                }
            }
        }

        let devices = DeviceTable::from_devices(usable);
        let configs = devices
            .devices()
            .iter()
            .map(|device| StreamConfig::for_device(&device.serial))
            .collect();

        info!(
            backend = backend_name,
            devices = devices.device_count(),
            streams = devices.slot_count(),
            "Streaming service ready"
        );

        let frames = FrameTable::new(devices.slot_count());
        if frames.is_empty() {
            warn!(backend = backend_name, "No devices found, every stream start will fail");
        }

        let slot_count = frames.len();
        Self {
            shared: Arc::new(Shared {
                backend_name,
                config,
                devices,
                pipelines,
                configs,
                frames,
                notifier: FrameNotifier::new(slot_count),
                counters: AcquisitionCounters::new(slot_count),
                skip_gate: Mutex::new(0),
                state: Mutex::new(ServiceState {
                    reference_count: 0,
                    started: false,
                    loop_state: LoopState::Idle,
                    controller: None,
                    sensors: Vec::new(),
                    pipelines_open: false,
                    exposure: ExposureState::default(),
                    last_error: None,
                }),
                state_changed: Condvar::new(),
            }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.shared.backend_name
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.shared.config
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// All logical streams, in slot order
    pub fn devices(&self) -> &[StreamDescriptor] {
        self.shared.devices.descriptors()
    }

    /// Physical devices, in device-slot order
    pub fn physical_devices(&self) -> &[DeviceInfo] {
        self.shared.devices.devices()
    }

    pub fn descriptor(&self, slot: usize) -> Option<&StreamDescriptor> {
        self.shared.devices.descriptor(slot)
    }

    pub fn device_count(&self) -> usize {
        self.shared.devices.device_count()
    }

    pub fn slot_count(&self) -> usize {
        self.shared.frames.len()
    }

    pub fn slot_of(&self, identity: &StreamIdentity) -> Option<usize> {
        self.shared.devices.slot_of(identity)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Take a reference on the acquisition loop and return the stream's slot
    ///
    /// The first reference spawns the worker. Every caller blocks until the
    /// worker has either opened all devices or failed; on failure the
    /// caller's reference is given back and the next call retries.
    pub fn start(&self, identity: &StreamIdentity) -> StreamingResult<usize> {
        let Some(slot) = self.slot_of(identity) else {
            warn!(path = %identity, "Requested stream not found");
            return Err(StreamingError::StreamNotFound(identity.device_path()));
        };

        let mut state = self.shared.lock_state();
        state.reference_count += 1;
        debug!(
            path = %identity,
            slot,
            references = state.reference_count,
            "Stream start requested"
        );

        if matches!(
            state.loop_state,
            LoopState::Idle | LoopState::Stopped | LoopState::Failed(_)
        ) {
            acquisition::spawn(&self.shared, &mut state);
        }

        let mut state = self.shared.wait_while_starting(state);
        match &state.loop_state {
            LoopState::Running => Ok(slot),
            LoopState::Failed(reason) => {
                let reason = reason.clone();
                state.reference_count = state.reference_count.saturating_sub(1);
                Err(StreamingError::StartupFailed(reason))
            }
            other => {
                // Another thread over-released and stopped the loop while we waited
                let reason = format!("acquisition {} before startup completed", other);
                warn!(path = %identity, reason = %reason, "Stream start interrupted");
                Err(StreamingError::StartupFailed(reason))
            }
        }
    }

    /// [`StreamingService::start`] returning a guard that releases on drop
    pub fn acquire(&self, identity: &StreamIdentity) -> StreamingResult<StreamLease> {
        let slot = self.start(identity)?;
        Ok(StreamLease::new(self.clone(), identity.clone(), slot))
    }

    /// Release one reference; the last one stops the worker and closes devices
    ///
    /// Releasing with no outstanding reference is a no-op reported as
    /// [`StreamingError::OverRelease`]. A worker that misses the join deadline
    /// is detached and reported as [`StopOutcome::StoppedUnclean`]; the loop
    /// can be started again right away.
    pub fn stop(&self) -> StreamingResult<StopOutcome> {
        let state = self.shared.lock_state();
        let mut state = self.shared.wait_while_starting(state);

        if state.reference_count == 0 {
            warn!("stop() called with no active stream");
            return Err(StreamingError::OverRelease);
        }

        state.reference_count -= 1;
        if state.reference_count > 0 {
            debug!(references = state.reference_count, "Stream released");
            return Ok(StopOutcome::Released {
                remaining: state.reference_count,
            });
        }

        if state.loop_state != LoopState::Running {
            return Ok(StopOutcome::Stopped);
        }
        Ok(self.shared.stop_acquisition(&mut state))
    }

    /// Stop acquisition regardless of outstanding references
    pub fn shutdown(&self) -> StopOutcome {
        let state = self.shared.lock_state();
        let mut state = self.shared.wait_while_starting(state);

        if state.reference_count > 0 {
            info!(
                references = state.reference_count,
                "Shutting down with active streams"
            );
        }
        state.reference_count = 0;

        if state.loop_state == LoopState::Running {
            self.shared.stop_acquisition(&mut state)
        } else {
            StopOutcome::Stopped
        }
    }

    pub fn reference_count(&self) -> usize {
        self.shared.lock_state().reference_count
    }

    /// Whether the acquisition loop is running
    pub fn is_started(&self) -> bool {
        self.shared.lock_state().started
    }

    pub fn loop_state(&self) -> LoopState {
        self.shared.lock_state().loop_state.clone()
    }

    /// Error of the last failed startup; cleared by a successful one
    pub fn last_error(&self) -> Option<StreamingError> {
        self.shared.lock_state().last_error.clone()
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Latest frame of `slot`; `None` if the slot never received one
    pub fn get_frame(&self, slot: usize) -> Option<Arc<VideoFrame>> {
        self.shared.frames.get(slot)
    }

    /// Receive a [`FrameReady`] for every frame stored from now on
    pub fn subscribe(&self) -> FrameReadyReceiver {
        self.shared.notifier.subscribe()
    }

    pub fn statistics(&self) -> StreamStatistics {
        self.shared.counters.snapshot()
    }

    // =========================================================================
    // Exposure
    // =========================================================================

    pub fn exposure(&self) -> i32 {
        self.shared.lock_state().exposure.value
    }

    /// Valid exposure range; sentinel bounds until devices were first opened
    pub fn exposure_bounds(&self) -> (i32, i32) {
        self.shared.lock_state().exposure.bounds()
    }

    /// Clamp and store `value`, pushing it to all open devices
    ///
    /// Returns the stored value. While devices are closed the value is only
    /// stored and is applied when they are next opened. A hardware failure is
    /// returned after the value has been stored.
    pub fn set_exposure(&self, value: i32) -> StreamingResult<i32> {
        let mut state = self.shared.lock_state();
        let stored = state.exposure.set(value);
        if stored != value {
            debug!(requested = value, stored, "Exposure clamped");
        }

        if state.pipelines_open {
            let written = exposure::apply(&state.sensors, stored)?;
            info!(exposure = stored, sensors = written, "Exposure applied");
        } else {
            debug!(exposure = stored, "Exposure stored, devices closed");
        }
        Ok(stored)
    }

    /// [`StreamingService::set_exposure`] with incoming frames dropped
    /// during the write and for a short settle delay after it
    pub fn push_exposure_transient(&self, value: i32) -> StreamingResult<i32> {
        let _skip = SkipGuard::engage(&self.shared.skip_gate);
        let result = self.set_exposure(value);
        thread::sleep(self.shared.config.exposure_settle());
        result
    }

    /// Whether frame sets are currently being dropped
    pub fn is_skipping_frames(&self) -> bool {
        *lock(&self.shared.skip_gate) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::simulated::{SimulatedContext, synthetic_frame, synthetic_frame_set};
    use crate::backends::camera::{SensorOption, StreamKind};
    use std::time::Duration;

    fn fast_config() -> StreamingConfig {
        StreamingConfig {
            frame_wait_timeout_ms: 20,
            stop_join_timeout_ms: 500,
            exposure_settle_ms: 10,
            ..StreamingConfig::default()
        }
    }

    fn color(serial: &str) -> StreamIdentity {
        StreamIdentity::new(serial, StreamKind::Color)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_enumeration() {
        let context = SimulatedContext::new(2);
        let service = StreamingService::new(&context, fast_config());

        assert_eq!(service.device_count(), 2);
        assert_eq!(service.slot_count(), 6);
        assert_eq!(service.devices()[4].device_path(), "SIM0001:IR_L");
        assert_eq!(service.loop_state(), LoopState::Idle);
        assert_eq!(service.backend_name(), "simulated");
    }

    #[test]
    fn test_every_slot_has_a_frame_cell() {
        let context = SimulatedContext::new(3);
        let service = StreamingService::new(&context, fast_config());

        assert_eq!(service.slot_count(), service.devices().len());
        assert_eq!(service.shared.frames.len(), 9);
        let frame = synthetic_frame("SIM0002", StreamKind::InfraredRight, 1);
        assert!(service.shared.frames.store(8, frame));
        assert!(service.get_frame(8).is_some());
        assert!(service.get_frame(service.slot_count()).is_none());
    }

    #[test]
    fn test_enumeration_failure_means_no_devices() {
        let context = SimulatedContext::new(2);
        context.set_fail_enumeration(true);
        let service = StreamingService::new(&context, fast_config());

        assert_eq!(service.slot_count(), 0);
        assert_eq!(
            service.start(&color("SIM0000")),
            Err(StreamingError::StreamNotFound("SIM0000:RGB".to_string()))
        );
        assert_eq!(service.reference_count(), 0);
    }

    #[test]
    fn test_start_opens_and_configures_every_device() {
        let context = SimulatedContext::new(2);
        let service = StreamingService::new(&context, fast_config());

        assert_eq!(service.start(&color("SIM0001")), Ok(3));
        assert_eq!(service.loop_state(), LoopState::Running);
        assert!(service.is_started());

        for serial in ["SIM0000", "SIM0001"] {
            let pipeline = context.pipeline(serial).unwrap();
            assert_eq!(pipeline.start_count(), 1);
            let stereo = pipeline.stereo_sensor();
            assert_eq!(stereo.value(SensorOption::EmitterEnabled), Some(0.0));
            assert_eq!(stereo.value(SensorOption::LaserPower), Some(0.0));
            assert_eq!(stereo.value(SensorOption::EnableAutoExposure), Some(0.0));
        }

        assert_eq!(service.stop(), Ok(StopOutcome::Stopped));
        assert_eq!(service.loop_state(), LoopState::Stopped);
    }

    #[test]
    fn test_exposure_discovered_on_first_open() {
        let context = SimulatedContext::new(1);
        let service = StreamingService::new(&context, fast_config());
        assert_eq!(service.exposure_bounds(), (1, 165_000));

        service.start(&color("SIM0000")).unwrap();
        assert_eq!(service.exposure_bounds(), (1, 165_000));
        assert_eq!(service.exposure(), 8_500);

        let rgb = context.pipeline("SIM0000").unwrap().rgb_sensor().clone();
        assert_eq!(rgb.value(SensorOption::Exposure), Some(8_500.0));
        service.stop().unwrap();
    }

    #[test]
    fn test_exposure_set_while_closed_applied_on_open() {
        let context = SimulatedContext::new(1);
        let service = StreamingService::new(&context, fast_config());

        assert_eq!(service.set_exposure(20_000), Ok(20_000));
        service.start(&color("SIM0000")).unwrap();

        let pipeline = context.pipeline("SIM0000").unwrap();
        assert_eq!(pipeline.stereo_sensor().value(SensorOption::Exposure), Some(20_000.0));
        assert_eq!(pipeline.rgb_sensor().value(SensorOption::Exposure), Some(10_000.0));
        assert_eq!(service.exposure(), 20_000);
        service.stop().unwrap();
    }

    #[test]
    fn test_demux_routes_by_serial() {
        let context = SimulatedContext::new(2);
        let service = StreamingService::new(&context, fast_config());
        service.start(&color("SIM0000")).unwrap();

        let pipeline = context.pipeline("SIM0001").unwrap();
        assert!(pipeline.inject(synthetic_frame_set("SIM0001", 7)));

        assert!(wait_for(|| service.get_frame(5).is_some()));
        assert_eq!(service.get_frame(3).unwrap().frame_number, 7);
        assert!(service.get_frame(0).is_none());
        service.stop().unwrap();
    }

    #[test]
    fn test_unknown_serial_counted() {
        let context = SimulatedContext::new(1);
        let service = StreamingService::new(&context, fast_config());
        service.start(&color("SIM0000")).unwrap();

        let pipeline = context.pipeline("SIM0000").unwrap();
        pipeline.inject(synthetic_frame_set("OTHER", 1));

        assert!(wait_for(|| service.statistics().unresolved_frames == 3));
        assert_eq!(service.statistics().total_frames(), 0);
        service.stop().unwrap();
    }

    #[test]
    fn test_skip_guard_nests() {
        let context = SimulatedContext::new(1);
        let service = StreamingService::new(&context, fast_config());

        let outer = SkipGuard::engage(&service.shared.skip_gate);
        let inner = SkipGuard::engage(&service.shared.skip_gate);
        drop(inner);
        assert!(service.is_skipping_frames());
        drop(outer);
        assert!(!service.is_skipping_frames());
    }

    #[test]
    fn test_shutdown_ignores_references() {
        let context = SimulatedContext::new(1);
        let service = StreamingService::new(&context, fast_config());
        service.start(&color("SIM0000")).unwrap();
        service.start(&color("SIM0000")).unwrap();

        assert_eq!(service.shutdown(), StopOutcome::Stopped);
        assert_eq!(service.reference_count(), 0);
        assert_eq!(context.pipeline("SIM0000").unwrap().stop_count(), 1);
        assert_eq!(service.stop(), Err(StreamingError::OverRelease));
    }

    #[test]
    fn test_dropping_service_closes_devices() {
        let context = SimulatedContext::new(1);
        let service = StreamingService::new(&context, fast_config());
        service.start(&color("SIM0000")).unwrap();

        let pipeline = context.pipeline("SIM0000").unwrap();
        drop(service);
        assert!(wait_for(|| !pipeline.is_started()));
    }
}
