// SPDX-License-Identifier: MPL-2.0

//! Hardware H.264 encoder selection and configuration
//!
//! Only hardware encoders are considered. Each one is configured for
//! real-time streaming:
//! - constant bitrate with low-latency tuning
//! - no B-frames, so output order equals input order
//! - a fixed key frame interval derived from the expected frame rate
//!
//! The profile is not set on the element; a caps filter after `h264parse`
//! forces `profile=main` during negotiation.

use super::session::EncoderSettings;
use crate::errors::EncoderError;
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use tracing::{debug, info, warn};

/// A known hardware H.264 encoder element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSpec {
    /// GStreamer element name
    pub element_name: &'static str,
    /// Human readable name
    pub display_name: &'static str,
    /// Priority (lower = higher priority)
    pub priority: u32,
}

/// Hardware H.264 encoders in priority order
pub const HARDWARE_H264_ENCODERS: &[EncoderSpec] = &[
    EncoderSpec {
        element_name: "vah264enc",
        display_name: "VA-API H.264 (HW)",
        priority: 40,
    },
    EncoderSpec {
        element_name: "vaapih264enc",
        display_name: "VA-API H.264 (legacy, HW)",
        priority: 41,
    },
    EncoderSpec {
        element_name: "nvh264enc",
        display_name: "NVIDIA H.264 (HW)",
        priority: 42,
    },
    EncoderSpec {
        element_name: "qsvh264enc",
        display_name: "Intel QSV H.264 (HW)",
        priority: 43,
    },
    EncoderSpec {
        element_name: "amfh264enc",
        display_name: "AMD AMF H.264 (HW)",
        priority: 44,
    },
    EncoderSpec {
        element_name: "v4l2h264enc",
        display_name: "V4L2 H.264 (HW)",
        priority: 45,
    },
];

/// Look up a catalog entry by element name
pub fn find_spec(element_name: &str) -> Option<&'static EncoderSpec> {
    HARDWARE_H264_ENCODERS
        .iter()
        .find(|spec| spec.element_name == element_name)
}

/// Information about an available encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    pub element_name: String,
    pub display_name: String,
    pub priority: u32,
}

impl From<&EncoderSpec> for EncoderInfo {
    fn from(spec: &EncoderSpec) -> Self {
        Self {
            element_name: spec.element_name.to_string(),
            display_name: spec.display_name.to_string(),
            priority: spec.priority,
        }
    }
}

/// Enumerate hardware H.264 encoders that can be instantiated
///
/// Returns a list sorted by priority
pub fn enumerate_video_encoders() -> Vec<EncoderInfo> {
    let _ = gst::init();

    let mut available: Vec<EncoderInfo> = HARDWARE_H264_ENCODERS
        .iter()
        .filter(|spec| gst::ElementFactory::make(spec.element_name).build().is_ok())
        .map(EncoderInfo::from)
        .collect();

    available.sort_by_key(|e| e.priority);
    available
}

/// Hardware encoders to try for `settings`, best first
///
/// An override must name a catalog entry; there is no software fallback.
/// Without one, every catalog entry whose element `is_installed` is a
/// candidate.
pub fn candidate_encoders(
    settings: &EncoderSettings,
    is_installed: impl Fn(&str) -> bool,
) -> Result<Vec<&'static EncoderSpec>, EncoderError> {
    let candidates: Vec<&'static EncoderSpec> = match settings.encoder_override.as_deref() {
        Some(name) => {
            let spec = find_spec(name).ok_or_else(|| {
                EncoderError::CreationFailed(format!(
                    "{} is not a supported hardware H.264 encoder",
                    name
                ))
            })?;
            vec![spec]
        }
        None => HARDWARE_H264_ENCODERS
            .iter()
            .filter(|spec| is_installed(spec.element_name))
            .collect(),
    };

    if candidates.is_empty() {
        return Err(EncoderError::CreationFailed(
            "No hardware H.264 encoder available. Install a VA-API, NVENC, QSV, AMF or V4L2 encoder plugin"
                .to_string(),
        ));
    }
    Ok(candidates)
}

/// Candidates whose element factory is registered with GStreamer
pub fn installed_video_encoders(
    settings: &EncoderSettings,
) -> Result<Vec<&'static EncoderSpec>, EncoderError> {
    gst::init().map_err(|e| {
        EncoderError::CreationFailed(format!("Failed to initialize GStreamer: {}", e))
    })?;
    candidate_encoders(settings, |name| gst::ElementFactory::find(name).is_some())
}

/// Run `attempt` on each candidate in order until one succeeds
///
/// Returns the first success together with the candidates that were not
/// tried yet, or the last failure.
pub fn first_working<T>(
    candidates: &[&'static EncoderSpec],
    mut attempt: impl FnMut(&'static EncoderSpec) -> Result<T, EncoderError>,
) -> Result<(T, Vec<&'static EncoderSpec>), EncoderError> {
    let mut last_error = None;
    for (index, &spec) in candidates.iter().enumerate() {
        match attempt(spec) {
            Ok(value) => return Ok((value, candidates[index + 1..].to_vec())),
            Err(e) => {
                warn!(encoder = %spec.element_name, error = %e, "Encoder unusable, trying next");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        EncoderError::CreationFailed("No hardware H.264 encoder candidates".to_string())
    }))
}

/// Create and configure the element for one catalog entry
pub fn make_video_encoder(
    spec: &EncoderSpec,
    settings: &EncoderSettings,
) -> Result<gst::Element, EncoderError> {
    let encoder = gst::ElementFactory::make(spec.element_name)
        .build()
        .map_err(|e| {
            debug!(encoder = %spec.element_name, error = %e, "Encoder not available");
            EncoderError::CreationFailed(format!("{}: {}", spec.element_name, e))
        })?;
    info!(encoder = %spec.element_name, "Selected hardware H.264 encoder");
    configure_video_encoder(&encoder, spec.element_name, settings);
    Ok(encoder)
}

/// Apply low-latency real-time settings to an encoder element
pub fn configure_video_encoder(
    encoder: &gst::Element,
    encoder_name: &str,
    settings: &EncoderSettings,
) {
    let bitrate = settings.bitrate_kbps;
    let gop = settings.keyframe_interval;

    match encoder_name {
        // VA-API encoders (new plugin style)
        "vah264enc" => {
            set_enum_if_present(encoder, "rate-control", "cbr");
            set_uint_if_present(encoder, "bitrate", bitrate);
            set_uint_if_present(encoder, "b-frames", 0);
            set_uint_if_present(encoder, "key-int-max", gop);
            // 7 = fastest target usage
            set_uint_if_present(encoder, "target-usage", 7);
            debug!(bitrate, gop, "Configured vah264enc");
        }

        // VA-API encoders (old plugin style)
        "vaapih264enc" => {
            set_enum_if_present(encoder, "rate-control", "cbr");
            set_uint_if_present(encoder, "bitrate", bitrate);
            set_uint_if_present(encoder, "max-bframes", 0);
            set_uint_if_present(encoder, "keyframe-period", gop);
            debug!(bitrate, gop, "Configured vaapih264enc");
        }

        // NVIDIA encoders
        "nvh264enc" => {
            set_enum_if_present(encoder, "rc-mode", "cbr");
            set_uint_if_present(encoder, "bitrate", bitrate);
            set_uint_if_present(encoder, "bframes", 0);
            set_uint_if_present(encoder, "gop-size", gop);
            set_bool_if_present(encoder, "zerolatency", true);
            debug!(bitrate, gop, "Configured nvh264enc");
        }

        // Intel QSV encoders
        "qsvh264enc" => {
            set_enum_if_present(encoder, "rate-control", "cbr");
            set_uint_if_present(encoder, "bitrate", bitrate);
            set_uint_if_present(encoder, "b-frames", 0);
            set_uint_if_present(encoder, "gop-size", gop);
            set_bool_if_present(encoder, "low-latency", true);
            debug!(bitrate, gop, "Configured qsvh264enc");
        }

        // AMD AMF encoders
        "amfh264enc" => {
            set_enum_if_present(encoder, "rate-control", "cbr");
            set_enum_if_present(encoder, "usage", "ultra-low-latency");
            set_uint_if_present(encoder, "bitrate", bitrate);
            set_uint_if_present(encoder, "b-frames", 0);
            set_uint_if_present(encoder, "gop-size", gop);
            debug!(bitrate, gop, "Configured amfh264enc");
        }

        // V4L2 stateful encoders take controls as a structure
        "v4l2h264enc" => {
            if encoder.find_property("extra-controls").is_some() {
                let controls = gst::Structure::builder("controls")
                    .field("video_bitrate", (bitrate * 1000) as i32)
                    .field("video_gop_size", gop as i32)
                    .field("video_b_frames", 0i32)
                    // V4L2_MPEG_VIDEO_H264_PROFILE_MAIN
                    .field("h264_profile", 2i32)
                    .build();
                encoder.set_property("extra-controls", controls);
            }
            debug!(bitrate, gop, "Configured v4l2h264enc");
        }

        _ => {
            warn!(encoder = encoder_name, "Unknown encoder, using defaults");
        }
    }
}

/// Set an unsigned property, adapting to elements that declare it as signed
fn set_uint_if_present(element: &gst::Element, name: &str, value: u32) -> bool {
    let Some(pspec) = element.find_property(name) else {
        return false;
    };
    let value_type = pspec.value_type();
    if value_type == glib::Type::U32 {
        element.set_property(name, value);
    } else if value_type == glib::Type::I32 {
        element.set_property(name, value as i32);
    } else {
        debug!(property = name, ?value_type, "Skipping property with unexpected type");
        return false;
    }
    true
}

fn set_bool_if_present(element: &gst::Element, name: &str, value: bool) -> bool {
    match element.find_property(name) {
        Some(pspec) if pspec.value_type() == glib::Type::BOOL => {
            element.set_property(name, value);
            true
        }
        _ => false,
    }
}

/// Set an enum property by nick, only when the element knows that nick
fn set_enum_if_present(element: &gst::Element, name: &str, nick: &str) -> bool {
    let Some(pspec) = element.find_property(name) else {
        return false;
    };
    let known = pspec
        .downcast_ref::<glib::ParamSpecEnum>()
        .is_some_and(|spec| spec.enum_class().value_by_nick(nick).is_some());
    if known {
        element.set_property_from_str(name, nick);
    } else {
        debug!(property = name, nick, "Encoder does not support value");
    }
    known
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_hardware_h264_in_priority_order() {
        let priorities: Vec<u32> = HARDWARE_H264_ENCODERS.iter().map(|s| s.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert!(
            HARDWARE_H264_ENCODERS
                .iter()
                .all(|s| s.element_name.contains("h264"))
        );
    }

    #[test]
    fn test_software_encoders_are_not_in_catalog() {
        assert!(find_spec("x264enc").is_none());
        assert!(find_spec("openh264enc").is_none());
        assert_eq!(find_spec("nvh264enc").map(|s| s.priority), Some(42));
    }

    fn settings() -> EncoderSettings {
        EncoderSettings::for_preset(&crate::backends::camera::types::CapturePreset::default())
    }

    #[test]
    fn test_override_outside_catalog_fails_creation() {
        let mut settings = settings();
        settings.encoder_override = Some("x264enc".to_string());
        assert!(matches!(
            candidate_encoders(&settings, |_| true),
            Err(EncoderError::CreationFailed(_))
        ));
    }

    #[test]
    fn test_candidates_follow_catalog_order_and_skip_missing_plugins() {
        let installed = ["qsvh264enc", "vah264enc", "v4l2h264enc"];
        let names: Vec<&str> = candidate_encoders(&settings(), |name| installed.contains(&name))
            .unwrap()
            .iter()
            .map(|spec| spec.element_name)
            .collect();
        assert_eq!(names, vec!["vah264enc", "qsvh264enc", "v4l2h264enc"]);

        assert!(candidate_encoders(&settings(), |_| false).is_err());
    }

    #[test]
    fn test_override_is_the_only_candidate() {
        let mut settings = settings();
        settings.encoder_override = Some("nvh264enc".to_string());
        let candidates = candidate_encoders(&settings, |_| true).unwrap();
        assert_eq!(candidates, vec![find_spec("nvh264enc").unwrap()]);
    }

    #[test]
    fn test_first_working_falls_through_failing_candidates() {
        let candidates: Vec<&EncoderSpec> = HARDWARE_H264_ENCODERS.iter().take(4).collect();
        let mut tried = Vec::new();

        let (chosen, rest) = first_working(&candidates, |spec| {
            tried.push(spec.element_name);
            if spec.element_name == "nvh264enc" {
                Ok(spec.element_name)
            } else {
                Err(EncoderError::CreationFailed("cannot link".into()))
            }
        })
        .unwrap();

        assert_eq!(chosen, "nvh264enc");
        assert_eq!(tried, vec!["vah264enc", "vaapih264enc", "nvh264enc"]);
        assert_eq!(rest, vec![find_spec("qsvh264enc").unwrap()]);
    }

    #[test]
    fn test_first_working_reports_last_failure() {
        let candidates: Vec<&EncoderSpec> = HARDWARE_H264_ENCODERS.iter().take(2).collect();
        let result: Result<((), _), _> = first_working(&candidates, |spec| {
            Err(EncoderError::PrepareFailed(spec.element_name.to_string()))
        });
        assert_eq!(
            result.unwrap_err(),
            EncoderError::PrepareFailed("vaapih264enc".to_string())
        );
    }
}
