// SPDX-License-Identifier: MPL-2.0

//! GStreamer encoder detection
//!
//! Reports which hardware H.264 encoders and helper elements the
//! GStreamer installation provides.

use super::video::HARDWARE_H264_ENCODERS;
use gstreamer as gst;
use tracing::{debug, info, warn};

/// Elements the encode pipeline needs besides the encoder itself
pub const REQUIRED_ELEMENTS: &[&str] = &["appsrc", "videoconvert", "h264parse", "appsink"];

/// Check if a specific GStreamer element is available
pub fn is_element_available(element_name: &str) -> bool {
    gst::init().ok();
    gst::ElementFactory::find(element_name).is_some()
}

/// Detect available hardware H.264 encoders
///
/// Returns element names in catalog priority order.
pub fn detect_video_encoders() -> Vec<String> {
    gst::init().ok();

    let mut available = Vec::new();
    for spec in HARDWARE_H264_ENCODERS {
        if is_element_available(spec.element_name) {
            debug!("Video encoder available: {}", spec.element_name);
            available.push(spec.element_name.to_string());
        }
    }

    info!("Detected {} hardware H.264 encoders", available.len());
    available
}

/// Required helper elements that are missing
pub fn missing_required_elements() -> Vec<&'static str> {
    REQUIRED_ELEMENTS
        .iter()
        .copied()
        .filter(|name| !is_element_available(name))
        .collect()
}

/// Log all available encoders (for debugging)
pub fn log_available_encoders() {
    info!("=== GStreamer Encoder Detection ===");

    for encoder in detect_video_encoders() {
        info!("  ✓ {}", encoder);
    }

    for element in missing_required_elements() {
        warn!("  ✗ missing required element {}", element);
    }
}
