// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use realsense_streaming::backends::camera::{PixelFormat, StreamKind, StreamProfile};
use realsense_streaming::constants::{
    STREAM_FPS, STREAM_HEIGHT, STREAM_WIDTH, SUB_STREAMS_PER_DEVICE, app_info,
};

#[test]
fn test_sub_stream_count_matches_kinds() {
    assert_eq!(StreamKind::ALL.len(), SUB_STREAMS_PER_DEVICE);
}

#[test]
fn test_sub_stream_order() {
    // Slot layout within a device: color, IR left, IR right
    for (index, kind) in StreamKind::ALL.into_iter().enumerate() {
        assert_eq!(kind.sub_stream_index(), index);
    }
}

#[test]
fn test_profiles_share_resolution() {
    for kind in StreamKind::ALL {
        let profile = StreamProfile::fixed(kind);
        assert_eq!((profile.width, profile.height), (STREAM_WIDTH, STREAM_HEIGHT));
        assert_eq!(profile.fps, STREAM_FPS);
    }
    assert_eq!(StreamProfile::fixed(StreamKind::Color).format, PixelFormat::Bgr8);
    assert_eq!(StreamProfile::fixed(StreamKind::InfraredLeft).format, PixelFormat::Y8);
}

#[test]
fn test_version_not_empty() {
    assert!(!app_info::version().is_empty());
}
