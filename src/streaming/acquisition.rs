// SPDX-License-Identifier: GPL-3.0-only

//! Acquisition worker
//!
//! One thread serves every device. Startup opens all pipelines, disables the
//! projector and auto-exposure, and applies the stored exposure; the outcome
//! is published through the service state so blocked `start()` callers wake
//! up. Afterwards each loop iteration waits on the next device in turn and
//! demultiplexes the returned frame set into the frame table.

use super::{LoopState, ServiceState, Shared, exposure, lock};
use crate::backends::camera::frame_loop::{CaptureLoopController, LoopAction};
use crate::backends::camera::{BackendError, FrameSet, Sensor};
use crate::constants::LOG_EVERY_N_FRAMES;
use crate::errors::StreamingError;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const ACQUISITION_THREAD_NAME: &str = "rs-acquisition";

/// Pause after a failed wait before polling again
const WAIT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Spawn the worker and mark the loop as starting
///
/// Must be called with the state lock held.
pub(super) fn spawn(shared: &Arc<Shared>, state: &mut ServiceState) {
    // A previous worker has exited or was signalled at stop
    state.controller = None;
    state.loop_state = LoopState::Starting;

    info!(devices = shared.devices.device_count(), "Starting acquisition");

    let weak = Arc::downgrade(shared);
    let controller = CaptureLoopController::start_with_init(
        ACQUISITION_THREAD_NAME,
        move |_running: &AtomicBool| AcquisitionWorker::open(weak),
        |worker: &mut AcquisitionWorker| worker.poll_next_device(),
    );

    if !controller.is_requested_running() {
        let reason = "could not spawn acquisition thread".to_string();
        state.loop_state = LoopState::Failed(reason.clone());
        state.last_error = Some(StreamingError::StartupFailed(reason));
        shared.state_changed.notify_all();
        return;
    }
    state.controller = Some(controller);
}

/// Per-thread state of the running worker
struct AcquisitionWorker {
    /// Weak so that dropping every service handle ends the loop
    shared: Weak<Shared>,
    next_device: usize,
}

impl AcquisitionWorker {
    /// Open and configure all devices, then publish the result
    fn open(weak: Weak<Shared>) -> Result<Self, StreamingError> {
        let shared = weak
            .upgrade()
            .ok_or_else(|| StreamingError::StartupFailed("service dropped".to_string()))?;

        let opened = shared.open_devices();

        let mut state = shared.lock_state();
        let result = opened.and_then(|sensors| {
            shared.apply_startup_exposure(&mut state, &sensors)?;
            Ok(sensors)
        });

        match result {
            Ok(sensors) => {
                info!(
                    devices = shared.pipelines.len(),
                    sensors = sensors.len(),
                    exposure = state.exposure.value,
                    "Acquisition running"
                );
                state.sensors = sensors;
                state.pipelines_open = true;
                state.started = true;
                state.loop_state = LoopState::Running;
                state.last_error = None;
                shared.state_changed.notify_all();
                Ok(Self {
                    shared: weak,
                    next_device: 0,
                })
            }
            Err(reason) => {
                error!(reason = %reason, "Acquisition startup failed");
                let err = StreamingError::StartupFailed(reason.clone());
                state.started = false;
                state.loop_state = LoopState::Failed(reason);
                state.last_error = Some(err.clone());
                shared.state_changed.notify_all();
                Err(err)
            }
        }
    }

    /// Wait on the next device in round-robin order
    fn poll_next_device(&mut self) -> LoopAction {
        let Some(shared) = self.shared.upgrade() else {
            debug!("Streaming service dropped, ending acquisition");
            return LoopAction::Stop;
        };
        if shared.pipelines.is_empty() {
            return LoopAction::Stop;
        }

        let device_slot = self.next_device % shared.pipelines.len();
        self.next_device = device_slot + 1;
        let pipeline = &shared.pipelines[device_slot];
        let serial = &shared.configs[device_slot].serial;

        match pipeline.wait_for_frames(shared.config.frame_wait_timeout()) {
            Ok(Some(frames)) => shared.demux(frames),
            Ok(None) => {
                shared.counters.wait_timed_out();
                debug!(serial = %serial, "No frames within timeout");
            }
            Err(BackendError::Closed) => {
                // Stop in progress; the running flag is checked next iteration
                debug!(serial = %serial, "Pipeline closed while waiting");
                thread::sleep(WAIT_ERROR_BACKOFF);
            }
            Err(e) => {
                let failures = shared.counters.wait_failed();
                if failures == 1 || failures % LOG_EVERY_N_FRAMES == 0 {
                    warn!(serial = %serial, error = %e, failures, "Waiting for frames failed");
                }
                thread::sleep(WAIT_ERROR_BACKOFF);
            }
        }

        LoopAction::Continue
    }
}

impl Shared {
    /// Start every pipeline; on failure the ones already started are closed
    fn open_devices(&self) -> Result<Vec<Arc<dyn Sensor>>, String> {
        let mut sensors = Vec::new();

        for (device_slot, (pipeline, config)) in
            self.pipelines.iter().zip(&self.configs).enumerate()
        {
            match pipeline.start(config) {
                Ok(device_sensors) => {
                    info!(
                        serial = %config.serial,
                        device_slot,
                        sensors = device_sensors.len(),
                        "Device opened"
                    );
                    sensors.extend(device_sensors);
                }
                Err(e) => {
                    error!(serial = %config.serial, error = %e, "Failed to open device");
                    self.close_pipelines();
                    return Err(format!("{}: {}", config.serial, e));
                }
            }
        }

        if let Err(e) = exposure::configure_sensors(&sensors) {
            error!(error = %e, "Failed to configure sensors");
            self.close_pipelines();
            return Err(e.to_string());
        }

        Ok(sensors)
    }

    /// Discover the exposure range if unknown, then write the stored value
    fn apply_startup_exposure(
        &self,
        state: &mut ServiceState,
        sensors: &[Arc<dyn Sensor>],
    ) -> Result<(), String> {
        if !state.exposure.discovered
            && let Some((range, current)) = exposure::discover(sensors)
        {
            state.exposure.adopt_hardware(range, current);
        }

        if let Err(e) = exposure::apply(sensors, state.exposure.value) {
            self.close_pipelines();
            return Err(format!("applying exposure failed: {}", e));
        }
        Ok(())
    }

    /// Route every frame of `frames` to its slot and notify subscribers
    ///
    /// Runs under the skip gate, so an exposure change never interleaves with
    /// a partially stored frame set.
    fn demux(&self, frames: FrameSet) {
        self.counters.frame_set_received();

        let skip = lock(&self.skip_gate);
        if *skip > 0 {
            self.counters.frame_set_skipped();
            debug!(frames = frames.len(), "Dropping frame set during exposure change");
            return;
        }

        for frame in frames {
            let Some(slot) = self.devices.resolve(&frame.serial, frame.stream_index) else {
                self.counters.frame_unresolved();
                debug!(
                    serial = %frame.serial,
                    stream_index = frame.stream_index,
                    "Frame matches no stream"
                );
                continue;
            };

            let frame_number = frame.frame_number;
            self.frames.store(slot, frame);
            let total = self.counters.frame_stored(slot);
            if total == 1 || total % LOG_EVERY_N_FRAMES == 0 {
                debug!(slot, frame_number, total, "Frame stored");
            }
            self.notifier.publish(slot);
        }
        drop(skip);
    }
}
