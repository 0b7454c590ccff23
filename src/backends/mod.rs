// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for depth camera capture
//!
//! - [`camera`]: Device context, capture pipeline and sensor traits, the
//!   librealsense2 backend (`realsense` feature) and the simulated backend

pub mod camera;
