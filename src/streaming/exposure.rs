// SPDX-License-Identifier: GPL-3.0-only

//! Manual exposure control shared by every opened device
//!
//! The stored value starts from sentinel bounds and is narrowed to the range
//! reported by the first sensor that supports exposure, the first time the
//! devices are opened. Writes are clamped into the known range; each sensor
//! additionally receives the value clamped to its own range.

use crate::backends::camera::{BackendError, BackendResult, OptionRange, Sensor, SensorOption};
use crate::constants::{EXPOSURE_DEFAULT, EXPOSURE_SENTINEL_MAX, EXPOSURE_SENTINEL_MIN};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options written to every sensor that supports them before streaming
const STARTUP_OPTIONS: [(SensorOption, f32); 3] = [
    (SensorOption::EmitterEnabled, 0.0),
    (SensorOption::LaserPower, 0.0),
    (SensorOption::EnableAutoExposure, 0.0),
];

/// Current exposure and its valid range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposureState {
    pub value: i32,
    pub min: i32,
    pub max: i32,
    /// Range has been read from hardware
    pub discovered: bool,
    /// A caller has set a value explicitly
    pub user_set: bool,
}

impl Default for ExposureState {
    fn default() -> Self {
        Self {
            value: EXPOSURE_DEFAULT,
            min: EXPOSURE_SENTINEL_MIN,
            max: EXPOSURE_SENTINEL_MAX,
            discovered: false,
            user_set: false,
        }
    }
}

impl ExposureState {
    pub fn bounds(&self) -> (i32, i32) {
        (self.min, self.max)
    }

    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max)
    }

    /// Store a caller-supplied value, clamped; returns what was stored
    pub fn set(&mut self, value: i32) -> i32 {
        self.value = self.clamp(value);
        self.user_set = true;
        self.value
    }

    /// Adopt the hardware range, and the hardware value unless one was set already
    pub fn adopt_hardware(&mut self, range: OptionRange, current: f32) {
        let min = range.min.round() as i32;
        let max = range.max.round() as i32;
        if min > max {
            warn!(min, max, "Ignoring inverted exposure range");
            return;
        }

        self.min = min;
        self.max = max;
        self.discovered = true;
        self.value = if self.user_set {
            self.clamp(self.value)
        } else {
            self.clamp(current.round() as i32)
        };

        info!(
            min = self.min,
            max = self.max,
            value = self.value,
            "Discovered exposure range"
        );
    }
}

/// Turn off the IR projector and auto-exposure on every sensor that has them
///
/// A rejected write is fatal: streaming with the projector on would corrupt
/// the infrared images.
pub fn configure_sensors(sensors: &[Arc<dyn Sensor>]) -> BackendResult<()> {
    for sensor in sensors {
        for (option, value) in STARTUP_OPTIONS {
            if !sensor.supports(option) {
                continue;
            }
            sensor.set_option(option, value).map_err(|e| {
                BackendError::InitializationFailed(format!(
                    "{}: setting {} failed: {}",
                    sensor.name(),
                    option,
                    e
                ))
            })?;
            debug!(sensor = %sensor.name(), %option, value, "Sensor option set");
        }
    }
    Ok(())
}

/// Range and current value of the first sensor that supports exposure
pub fn discover(sensors: &[Arc<dyn Sensor>]) -> Option<(OptionRange, f32)> {
    let sensor = sensors
        .iter()
        .find(|sensor| sensor.supports(SensorOption::Exposure))?;

    match (
        sensor.option_range(SensorOption::Exposure),
        sensor.get_option(SensorOption::Exposure),
    ) {
        (Ok(range), Ok(current)) => Some((range, current)),
        (Err(e), _) | (_, Err(e)) => {
            warn!(sensor = %sensor.name(), error = %e, "Could not read exposure range");
            None
        }
    }
}

/// Write `value` to every exposure-capable sensor, clamped per sensor
///
/// All sensors are attempted; the first error is returned. Returns the number
/// of sensors written.
pub fn apply(sensors: &[Arc<dyn Sensor>], value: i32) -> BackendResult<usize> {
    let mut written = 0;
    let mut first_error = None;

    for sensor in sensors {
        if !sensor.supports(SensorOption::Exposure) {
            continue;
        }

        let target = match sensor.option_range(SensorOption::Exposure) {
            Ok(range) => (value as f32).clamp(range.min, range.max),
            Err(_) => value as f32,
        };

        match sensor.set_option(SensorOption::Exposure, target) {
            Ok(()) => written += 1,
            Err(e) => {
                warn!(sensor = %sensor.name(), value = target, error = %e, "Failed to set exposure");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::simulated::SimulatedSensor;

    fn sensors() -> (Arc<SimulatedSensor>, Arc<SimulatedSensor>, Vec<Arc<dyn Sensor>>) {
        let stereo = Arc::new(SimulatedSensor::stereo_module());
        let rgb = Arc::new(SimulatedSensor::rgb_module());
        let all: Vec<Arc<dyn Sensor>> = vec![stereo.clone(), rgb.clone()];
        (stereo, rgb, all)
    }

    #[test]
    fn test_default_state_uses_sentinels() {
        let state = ExposureState::default();
        assert_eq!(state.bounds(), (EXPOSURE_SENTINEL_MIN, EXPOSURE_SENTINEL_MAX));
        assert!(!state.discovered);
    }

    #[test]
    fn test_set_clamps() {
        let mut state = ExposureState::default();
        assert_eq!(state.set(-100), EXPOSURE_SENTINEL_MIN);
        assert_eq!(state.set(EXPOSURE_SENTINEL_MAX + 1000), EXPOSURE_SENTINEL_MAX);
        assert!(state.user_set);
    }

    #[test]
    fn test_adopt_hardware_value_unless_user_set() {
        let range = OptionRange {
            min: 20.0,
            max: 1000.0,
            step: 1.0,
            default: 100.0,
        };

        let mut fresh = ExposureState::default();
        fresh.adopt_hardware(range, 333.0);
        assert_eq!((fresh.min, fresh.max, fresh.value), (20, 1000, 333));

        let mut chosen = ExposureState::default();
        chosen.set(5000);
        chosen.adopt_hardware(range, 333.0);
        assert_eq!(chosen.value, 1000);
    }

    #[test]
    fn test_inverted_range_ignored() {
        let mut state = ExposureState::default();
        state.adopt_hardware(
            OptionRange {
                min: 10.0,
                max: 1.0,
                step: 1.0,
                default: 5.0,
            },
            5.0,
        );
        assert!(!state.discovered);
        assert_eq!(state, ExposureState::default());
    }

    #[test]
    fn test_configure_disables_projector_and_auto_exposure() {
        let (stereo, rgb, all) = sensors();
        configure_sensors(&all).unwrap();

        assert_eq!(stereo.value(SensorOption::EmitterEnabled), Some(0.0));
        assert_eq!(stereo.value(SensorOption::LaserPower), Some(0.0));
        assert_eq!(stereo.value(SensorOption::EnableAutoExposure), Some(0.0));
        assert_eq!(rgb.value(SensorOption::EnableAutoExposure), Some(0.0));
        assert!(rgb.writes_of(SensorOption::EmitterEnabled).is_empty());
    }

    #[test]
    fn test_configure_failure_is_fatal() {
        let (stereo, _rgb, all) = sensors();
        stereo.fail_writes_of(SensorOption::LaserPower);
        assert!(matches!(
            configure_sensors(&all),
            Err(BackendError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_discover_uses_first_exposure_sensor() {
        let (_stereo, _rgb, all) = sensors();
        let (range, current) = discover(&all).unwrap();
        assert_eq!(range.max, 165_000.0);
        assert_eq!(current, 8_500.0);
        assert!(discover(&[]).is_none());
    }

    #[test]
    fn test_apply_clamps_per_sensor() {
        let (stereo, rgb, all) = sensors();
        assert_eq!(apply(&all, 50_000).unwrap(), 2);
        assert_eq!(stereo.value(SensorOption::Exposure), Some(50_000.0));
        assert_eq!(rgb.value(SensorOption::Exposure), Some(10_000.0));
    }

    #[test]
    fn test_apply_reports_failure_after_trying_all() {
        let (stereo, rgb, all) = sensors();
        stereo.fail_writes_of(SensorOption::Exposure);
        assert!(apply(&all, 200).is_err());
        assert_eq!(rgb.value(SensorOption::Exposure), Some(200.0));
    }
}
