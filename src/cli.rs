// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the streaming service
//!
//! This module provides command-line functionality for:
//! - Listing the logical streams of every device
//! - Streaming for a while and reporting frame counts
//! - Showing or writing the configuration file

use realsense_streaming::backends::camera::DeviceContext;
#[cfg(feature = "realsense")]
use realsense_streaming::backends::camera::realsense::RealsenseContext;
#[cfg(not(feature = "realsense"))]
use realsense_streaming::backends::camera::simulated::SimulatedContext;
use realsense_streaming::config::StreamingConfig;
use realsense_streaming::streaming::{StreamIdentity, StreamLease, StreamingService};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Options shared by every command
pub struct CommonOptions {
    pub config_path: Option<PathBuf>,
    pub devices: Option<usize>,
}

impl CommonOptions {
    fn config_path(&self) -> Result<PathBuf, Box<dyn std::error::Error>> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Ok(StreamingConfig::default_path()?),
        }
    }

    fn load_config(&self) -> Result<StreamingConfig, Box<dyn std::error::Error>> {
        let mut config = StreamingConfig::load(&self.config_path()?)?;
        if let Some(devices) = self.devices {
            config.simulated_devices = devices;
        }
        Ok(config)
    }

    fn open_service(&self) -> Result<StreamingService, Box<dyn std::error::Error>> {
        let config = self.load_config()?;
        let context = device_context(&config)?;
        Ok(StreamingService::new(context.as_ref(), config))
    }
}

/// Attached RealSense cameras
#[cfg(feature = "realsense")]
fn device_context(
    _config: &StreamingConfig,
) -> Result<Box<dyn DeviceContext>, Box<dyn std::error::Error>> {
    Ok(Box::new(RealsenseContext::new()?))
}

/// Simulated cameras, for builds without the librealsense2 backend
#[cfg(not(feature = "realsense"))]
fn device_context(
    config: &StreamingConfig,
) -> Result<Box<dyn DeviceContext>, Box<dyn std::error::Error>> {
    Ok(Box::new(
        SimulatedContext::new(config.simulated_devices)
            .with_frame_generator(config.simulated_frame_generator),
    ))
}

/// List all logical streams
pub fn list_streams(options: &CommonOptions, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let service = options.open_service()?;

    if json {
        println!("{}", serde_json::to_string_pretty(service.devices())?);
        return Ok(());
    }

    if service.slot_count() == 0 {
        println!("No devices found.");
        return Ok(());
    }

    println!("Available streams ({} backend):", service.backend_name());
    println!();
    for (slot, descriptor) in service.devices().iter().enumerate() {
        println!(
            "  [{}] {:<16} {}  {}",
            slot,
            descriptor.device_path(),
            descriptor.profile,
            descriptor.name
        );
    }
    println!();

    Ok(())
}

/// Stream the requested paths (all streams if none) and report frame counts
pub fn stream(
    options: &CommonOptions,
    paths: &[String],
    seconds: u64,
    exposure: Option<i32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = options.open_service()?;

    let identities: Vec<StreamIdentity> = if paths.is_empty() {
        service
            .devices()
            .iter()
            .map(|descriptor| descriptor.identity.clone())
            .collect()
    } else {
        paths
            .iter()
            .map(|path| {
                StreamIdentity::parse_device_path(path)
                    .ok_or_else(|| format!("Invalid stream path: {}", path))
            })
            .collect::<Result<_, _>>()?
    };

    if identities.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    let mut receiver = service.subscribe();
    let leases = identities
        .iter()
        .map(|identity| service.acquire(identity))
        .collect::<Result<Vec<StreamLease>, _>>()?;

    for lease in &leases {
        println!("Streaming: [{}] {}", lease.slot(), lease.identity());
    }

    if let Some(value) = exposure {
        let stored = service.push_exposure_transient(value)?;
        let (min, max) = service.exposure_bounds();
        println!("Exposure: {} (range {}..={})", stored, min, max);
    }

    println!();
    println!("Streaming... (press Ctrl+C to stop early)");

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let target_duration = Duration::from_secs(seconds);
    let mut updates = 0u64;

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        // Events are coalesced per stream, so frames come from the counters
        while receiver.try_recv().is_ok() {
            updates += 1;
        }
        let frames = service.statistics().total_frames();

        let elapsed = start.elapsed().as_secs();
        print!(
            "\rStreaming: {:02}:{:02}  frames: {}  updates: {}",
            elapsed / 60,
            elapsed % 60,
            frames,
            updates
        );
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    for lease in leases {
        lease.release()?;
    }

    let stats = service.statistics();
    println!();
    println!("Frames per stream:");
    for (slot, count) in stats.frames_per_slot.iter().enumerate() {
        if let Some(descriptor) = service.descriptor(slot) {
            println!("  [{}] {:<16} {}", slot, descriptor.device_path(), count);
        }
    }
    println!(
        "Frame sets: {} (skipped {}), timeouts: {}, errors: {}",
        stats.frame_sets, stats.skipped_frame_sets, stats.wait_timeouts, stats.wait_errors
    );

    Ok(())
}

/// Print the effective configuration, optionally writing it to disk
pub fn show_config(options: &CommonOptions, write: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = options.config_path()?;
    let config = options.load_config()?;

    println!("Config file: {}", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);

    if write {
        config.save(&path)?;
        println!("Config saved: {}", path.display());
    }

    Ok(())
}
