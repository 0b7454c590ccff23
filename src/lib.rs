// SPDX-License-Identifier: GPL-3.0-only

//! RealSense Streaming - multi-device depth camera streaming service
//!
//! Presents every attached depth camera as three logical streams (color,
//! infrared left, infrared right) backed by a single shared acquisition
//! thread.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera runtime abstraction, the librealsense2 backend
//!   (`realsense` feature) and the simulated backend
//! - [`streaming`]: Device table, acquisition loop, frame table and exposure
//! - [`config`]: User configuration handling
//! - [`errors`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use realsense_streaming::backends::camera::StreamKind;
//! use realsense_streaming::backends::camera::simulated::SimulatedContext;
//! use realsense_streaming::{StreamIdentity, StreamingConfig, StreamingService};
//!
//! let context = SimulatedContext::new(1).with_frame_generator(true);
//! let service = StreamingService::new(&context, StreamingConfig::default());
//! let lease = service
//!     .acquire(&StreamIdentity::new("SIM0000", StreamKind::InfraredLeft))
//!     .unwrap();
//! let _frame = lease.latest_frame();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod streaming;

// Re-export commonly used types
pub use config::StreamingConfig;
pub use errors::{StreamingError, StreamingResult};
pub use streaming::{
    FrameReady, LoopState, StopOutcome, StreamDescriptor, StreamIdentity, StreamLease,
    StreamingService,
};
