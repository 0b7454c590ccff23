// SPDX-License-Identifier: GPL-3.0-only

//! Service configuration
//!
//! Only timing knobs and simulation parameters live here. The stream layout
//! (resolution, framerate, sub-streams per device) is fixed in
//! [`crate::constants`].

use crate::constants::{EXPOSURE_SETTLE_DELAY, FRAME_WAIT_TIMEOUT, STOP_JOIN_TIMEOUT};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory name below the platform configuration directory
const CONFIG_DIR_NAME: &str = "realsense-streaming";

/// Configuration file name
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bounded wait for one device's next frame set (ms)
    pub frame_wait_timeout_ms: u64,
    /// Bounded wait for the acquisition worker on shutdown (ms)
    pub stop_join_timeout_ms: u64,
    /// Frame suppression window after a transient exposure push (ms)
    pub exposure_settle_ms: u64,
    /// Number of devices the simulated backend reports
    pub simulated_devices: usize,
    /// Whether simulated devices produce frames on their own
    pub simulated_frame_generator: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            frame_wait_timeout_ms: FRAME_WAIT_TIMEOUT.as_millis() as u64,
            stop_join_timeout_ms: STOP_JOIN_TIMEOUT.as_millis() as u64,
            exposure_settle_ms: EXPOSURE_SETTLE_DELAY.as_millis() as u64,
            simulated_devices: 1,
            simulated_frame_generator: true,
        }
    }
}

impl StreamingConfig {
    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }

    pub fn exposure_settle(&self) -> Duration {
        Duration::from_millis(self.exposure_settle_ms)
    }

    /// Default location of the configuration file
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load configuration from `path`, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path()?)
    }

    /// Write configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: StreamingConfig =
            serde_json::from_str(r#"{ "simulated_devices": 3 }"#).unwrap();
        assert_eq!(config.simulated_devices, 3);
        assert_eq!(config.frame_wait_timeout(), FRAME_WAIT_TIMEOUT);
        assert_eq!(config.stop_join_timeout(), STOP_JOIN_TIMEOUT);
        assert_eq!(config.exposure_settle(), EXPOSURE_SETTLE_DELAY);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = serde_json::from_str::<StreamingConfig>("{ not json")
            .map_err(ConfigError::from)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("rs-streaming-missing-config-does-not-exist.json");
        let config = StreamingConfig::load(&path).unwrap();
        assert_eq!(config, StreamingConfig::default());
    }
}
