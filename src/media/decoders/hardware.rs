// SPDX-License-Identifier: MPL-2.0

//! Hardware H.264 decoder detection

use tracing::{debug, info};

/// Hardware H.264 decoders that accept AVC framed input
const HW_H264_CANDIDATES: &[(&str, &str)] = &[
    ("vah264dec", "VA-API H.264 decoder"),
    ("vaapih264dec", "VA-API H.264 decoder (legacy)"),
    ("nvh264dec", "NVIDIA H.264 decoder"),
    ("v4l2slh264dec", "V4L2 stateless H.264 decoder"),
    ("v4l2h264dec", "V4L2 H.264 decoder"),
];

/// Detect available hardware H.264 decoders
///
/// Software decoders such as `avdec_h264` are not included.
pub fn detect_hw_decoders() -> Vec<&'static str> {
    debug!("Detecting available hardware decoders");
    if gstreamer::init().is_err() {
        return Vec::new();
    }

    let mut available = Vec::new();
    for (decoder, desc) in HW_H264_CANDIDATES {
        if gstreamer::ElementFactory::find(decoder).is_some() {
            info!("✓ {} available", desc);
            available.push(*decoder);
        } else {
            debug!("✗ {} not available", desc);
        }
    }

    if available.is_empty() {
        info!("No hardware H.264 decoders available");
    } else {
        info!("Found {} hardware decoder(s)", available.len());
    }

    available
}
