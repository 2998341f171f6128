// SPDX-License-Identifier: MPL-2.0

//! Media processing utilities
//!
//! # Video Encoding
//!
//! The [`encoders`] module owns the hardware H.264 encoder: catalog,
//! detection and the create/prepare/submit session.
//!
//! # Framing
//!
//! [`formats::avcc`] handles length-prefixed NAL units and parameter sets.
//!
//! # Modules
//!
//! - [`decoders`]: Receiver bootstrap and hardware decoder detection
//! - [`encoders`]: Hardware encoder session
//! - [`formats`]: AVC framing
//! - [`nv12_converter`]: NV12 to RGBA conversion for previews

pub mod decoders;
pub mod encoders;
pub mod formats;
pub mod nv12_converter;

// Re-export commonly used types
pub use decoders::{FormatDescription, detect_hw_decoders};
pub use nv12_converter::convert_nv12_to_rgba;
