// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use realsense_streaming::StreamingConfig;
use realsense_streaming::constants::{EXPOSURE_SETTLE_DELAY, FRAME_WAIT_TIMEOUT, STOP_JOIN_TIMEOUT};

#[test]
fn test_config_default() {
    // Defaults mirror the timing constants
    let config = StreamingConfig::default();
    assert_eq!(config.frame_wait_timeout(), FRAME_WAIT_TIMEOUT);
    assert_eq!(config.stop_join_timeout(), STOP_JOIN_TIMEOUT);
    assert_eq!(config.exposure_settle(), EXPOSURE_SETTLE_DELAY);
    assert_eq!(config.simulated_devices, 1);
    assert!(config.simulated_frame_generator);
}

#[test]
fn test_config_save_and_load() {
    let dir = std::env::temp_dir().join(format!("rs-streaming-config-test-{}", std::process::id()));
    let path = dir.join("nested").join("config.json");

    let config = StreamingConfig {
        simulated_devices: 4,
        frame_wait_timeout_ms: 250,
        ..StreamingConfig::default()
    };
    config.save(&path).unwrap();

    let loaded = StreamingConfig::load(&path).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_config_rejects_garbage() {
    let dir = std::env::temp_dir().join(format!("rs-streaming-bad-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(&path, "simulated_devices = 3").unwrap();

    assert!(StreamingConfig::load(&path).is_err());

    let _ = std::fs::remove_dir_all(&dir);
}
