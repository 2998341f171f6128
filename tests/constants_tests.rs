// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use rtp_camera::config::Config;
use rtp_camera::constants::{capture, encoder, format_bitrate, timing};

#[test]
fn test_default_capture_bitrate() {
    assert_eq!(encoder::DEFAULT_BITRATE_KBPS, 2_500);
    assert_eq!(Config::default().bitrate_kbps, encoder::DEFAULT_BITRATE_KBPS);
    assert_eq!(format_bitrate(encoder::DEFAULT_BITRATE_KBPS), "2.5 Mbps");
    assert_eq!(format_bitrate(800), "800 kbps");
}

#[test]
fn test_capture_and_encoder_parameters() {
    assert_eq!((capture::WIDTH, capture::HEIGHT), (1280, 720));
    assert_eq!(capture::FRAMERATE_NUM / capture::FRAMERATE_DENOM, 30);
    assert_eq!(capture::PIXEL_FORMAT, "NV12");
    assert_eq!(encoder::EXPECTED_FRAME_RATE, 30);
    assert_eq!(encoder::NAL_LENGTH_SIZE, 4);
    assert_eq!(encoder::PROFILE, "main");
}

#[test]
fn test_keyframe_interval_is_two_seconds() {
    assert_eq!(
        encoder::DEFAULT_KEYFRAME_INTERVAL,
        2 * encoder::EXPECTED_FRAME_RATE
    );
}

#[test]
fn test_frame_log_interval_is_one_second() {
    assert_eq!(timing::FRAME_LOG_INTERVAL, encoder::EXPECTED_FRAME_RATE as u64);
}
