// SPDX-License-Identifier: MPL-2.0

//! Hardware H.264 encoding
//!
//! - [`video`]: encoder catalog, selection and element configuration
//! - [`detection`]: what the running system provides
//! - [`session`]: the create/prepare/submit lifecycle and completion path
//! - [`gstreamer`]: the GStreamer implementation of that lifecycle

pub mod detection;
pub mod gstreamer;
pub mod session;
pub mod video;

pub use detection::log_available_encoders;
pub use session::{EncoderSession, EncoderSettings, EncoderState, ReadyEncoder};
