// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends

use crate::constants::capture;
use gstreamer as gst;
use gstreamer::buffer::{MappedBuffer, Readable};
use std::sync::Arc;
use std::time::Duration;

/// Frame data storage - either pre-copied bytes or zero-copy GStreamer buffer
///
/// The `Mapped` variant keeps the GStreamer buffer mapped and alive until all
/// references are dropped, so frames can reach the encoder without a copy.
#[derive(Clone)]
pub enum FrameData {
    /// Pre-copied bytes (used for file sources, tests, etc.)
    Copied(Arc<[u8]>),
    /// Zero-copy mapped GStreamer buffer - no data copy, just reference counting
    Mapped(Arc<MappedBuffer<Readable>>),
}

impl FrameData {
    /// Create FrameData from a mapped GStreamer buffer (zero-copy)
    pub fn from_mapped_buffer(buffer: MappedBuffer<Readable>) -> Self {
        FrameData::Mapped(Arc::new(buffer))
    }

    /// Get the length of the frame data in bytes
    pub fn len(&self) -> usize {
        match self {
            FrameData::Copied(data) => data.len(),
            FrameData::Mapped(buf) => buf.len(),
        }
    }

    /// Check if the frame data is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap the frame data in a GStreamer buffer without copying pixels
    pub fn to_gst_buffer(&self) -> gst::Buffer {
        match self {
            FrameData::Copied(data) => gst::Buffer::from_slice(Arc::clone(data)),
            FrameData::Mapped(buf) => buf.buffer().to_owned(),
        }
    }
}

impl std::fmt::Debug for FrameData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameData::Copied(data) => write!(f, "FrameData::Copied({} bytes)", data.len()),
            FrameData::Mapped(buf) => write!(f, "FrameData::Mapped({} bytes)", buf.len()),
        }
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Copied(data) => data.as_ref(),
            FrameData::Mapped(buf) => buf.as_slice(),
        }
    }
}

impl std::ops::Deref for FrameData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_ref()
    }
}

/// Represents a camera device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    pub name: String,
    /// Device path or PipeWire node reference; empty means auto-select
    pub path: String,
    /// GStreamer device class (e.g., "Video/Source")
    pub device_class: String,
}

impl CameraDevice {
    /// Placeholder device that lets PipeWire choose the default camera
    pub fn pipewire_default() -> Self {
        Self {
            name: "Default Camera (PipeWire)".to_string(),
            path: String::new(),
            device_class: "Video/Source".to_string(),
        }
    }
}

/// Framerate as a fraction (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Get the framerate as a floating point value
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Get the rounded integer framerate
    pub fn as_int(&self) -> u32 {
        self.num / self.denom
    }

    /// Nominal duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000u64 * self.denom as u64 / self.num.max(1) as u64)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::new(capture::FRAMERATE_NUM, capture::FRAMERATE_DENOM)
    }
}

/// Fixed output format of the capture session, always NV12
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePreset {
    pub width: u32,
    pub height: u32,
    pub framerate: Framerate,
}

impl CapturePreset {
    /// Raw video caps string for this preset
    pub fn caps_string(&self) -> String {
        format!(
            "video/x-raw,format={},width=(int){},height=(int){},framerate=(fraction){}/{}",
            capture::PIXEL_FORMAT,
            self.width,
            self.height,
            self.framerate.num,
            self.framerate.denom
        )
    }
}

impl Default for CapturePreset {
    /// 1280x720 at 30 fps, NV12
    fn default() -> Self {
        Self {
            width: capture::WIDTH,
            height: capture::HEIGHT,
            framerate: Framerate::default(),
        }
    }
}

impl std::fmt::Display for CapturePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} @ {}fps {}",
            self.width,
            self.height,
            self.framerate,
            capture::PIXEL_FORMAT
        )
    }
}

/// A single captured NV12 image plus its presentation timestamp
///
/// Only borrowed by the delivery callback; the encoder takes its own
/// buffer reference when a frame is submitted.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub stride_y: u32,
    pub stride_uv: u32,
    pub offset_uv: usize,
    /// Presentation timestamp relative to the first captured frame
    pub pts: Duration,
    pub data: FrameData,
}

impl RawFrame {
    /// Build a tightly packed NV12 frame from copied bytes
    pub fn nv12_packed(width: u32, height: u32, pts: Duration, data: Arc<[u8]>) -> Self {
        Self {
            width,
            height,
            stride_y: width,
            stride_uv: width,
            offset_uv: (width * height) as usize,
            pts,
            data: FrameData::Copied(data),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone)]
pub enum BackendError {
    /// Backend is not available on this system
    NotAvailable(String),
    /// Failed to initialize backend
    InitializationFailed(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Format not supported
    FormatNotSupported(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Backend not available: {}", msg),
            BackendError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for crate::errors::CaptureError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::DeviceNotFound(_) => crate::errors::CaptureError::NoDevice,
            BackendError::InitializationFailed(msg) => {
                crate::errors::CaptureError::DeviceOpenFailed(msg)
            }
            other => crate::errors::CaptureError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preset_is_hd30() {
        let preset = CapturePreset::default();
        assert_eq!((preset.width, preset.height), (1280, 720));
        assert_eq!(preset.framerate.as_int(), 30);
        assert_eq!(
            preset.caps_string(),
            "video/x-raw,format=NV12,width=(int)1280,height=(int)720,framerate=(fraction)30/1"
        );
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(
            Framerate::new(30, 1).frame_duration(),
            Duration::from_nanos(33_333_333)
        );
    }

    #[test]
    fn test_packed_nv12_layout() {
        let frame = RawFrame::nv12_packed(4, 2, Duration::ZERO, Arc::from(vec![0u8; 12]));
        assert_eq!(frame.offset_uv, 8);
        assert_eq!(frame.data.len(), 12);
    }
}
