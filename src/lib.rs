// SPDX-License-Identifier: MPL-2.0

//! RTP Camera - live camera capture into a hardware H.264 encoder
//!
//! Frames from the default camera are captured at 1280x720, 30 fps, encoded
//! by a hardware H.264 encoder and handed to an external transport without
//! copying the compressed payload.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera access authorization and the capture session
//! - [`media`]: Encoder session, AVC framing and decoder bootstrap
//! - [`pipelines`]: Completion ordering, payload handoff and sinks
//! - [`ffi`]: C entry points for the external transport
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let (sink, mut units) = ChannelSink::new(64);
//! let mut session = CaptureSession::new(
//!     GstCaptureBackend::new()?,
//!     GstEncoderBackend,
//!     PortalAccess::new(),
//!     Arc::new(sink),
//! );
//! session.configure().await?;
//! session.start().await?;
//! while let Some(unit) = units.recv().await {
//!     send(unit.data());
//!     unit.release();
//! }
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod ffi;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use backends::authorization::{AuthorizationGate, AuthorizationStatus, PortalAccess};
pub use backends::camera::{CaptureSession, GstCaptureBackend, SessionState};
pub use config::Config;
pub use errors::{AppError, CaptureError, EncoderError};
pub use media::encoders::gstreamer::GstEncoderBackend;
pub use pipelines::video::handoff::EncodedUnit;
pub use pipelines::video::sink::{ChannelSink, Sink, StreamType};
