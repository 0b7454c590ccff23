// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the streaming service

use crate::backends::camera::BackendError;
use std::fmt;

/// Result type alias using StreamingError
pub type StreamingResult<T> = Result<T, StreamingError>;

/// Errors reported by [`crate::streaming::StreamingService`]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingError {
    /// No enumerated stream matches the requested identity
    StreamNotFound(String),
    /// The acquisition loop could not open or configure the devices
    StartupFailed(String),
    /// `stop()` was called with no outstanding `start()`
    OverRelease,
    /// A hardware operation failed outside of startup
    Backend(BackendError),
}

/// Configuration file errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// No per-user configuration directory on this platform
    NoConfigDir,
    /// Reading or writing the file failed
    Io(String),
    /// The file is not valid configuration JSON
    Parse(String),
}

impl fmt::Display for StreamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamingError::StreamNotFound(path) => write!(f, "Stream not found: {}", path),
            StreamingError::StartupFailed(msg) => write!(f, "Acquisition startup failed: {}", msg),
            StreamingError::OverRelease => {
                write!(f, "stop() called without a matching start()")
            }
            StreamingError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(f, "No configuration directory available"),
            ConfigError::Io(msg) => write!(f, "Configuration I/O error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for StreamingError {}
impl std::error::Error for ConfigError {}

impl From<BackendError> for StreamingError {
    fn from(err: BackendError) -> Self {
        StreamingError::Backend(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
