// SPDX-License-Identifier: MPL-2.0

//! Error types for the capture and encode pipeline
//!
//! Startup failures ([`CaptureError`], [`EncoderError::CreationFailed`]) are
//! returned to whoever drives configuration. Per-frame failures use the same
//! [`EncoderError`] type but are logged and dropped where they occur.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for capture session setup
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Result type alias for encoder operations
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Capture session errors
    Capture(CaptureError),
    /// Encoder errors
    Encoder(EncoderError),
    /// Configuration errors
    Config(String),
    /// Generic error with message
    Other(String),
}

/// Capture session setup errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Camera access was refused by the user or platform
    PermissionDenied,
    /// No video input device is present
    NoDevice,
    /// The device exists but could not be opened
    DeviceOpenFailed(String),
    /// The session rejected the device input
    CannotAddInput,
    /// The session rejected the frame output
    CannotAddOutput,
    /// The session already left Idle; configuration runs at most once
    AlreadyConfigured,
    /// Capture backend failure
    Backend(String),
}

/// Hardware encoder errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderError {
    /// The platform could not allocate the requested encoder
    CreationFailed(String),
    /// Priming the encoder pipeline failed
    PrepareFailed(String),
    /// A frame was not accepted by the encoder
    SubmissionFailed(String),
    /// A submitted frame failed to encode
    CompletionFailed(String),
    /// The encoder returned a sample whose data is not ready
    DataNotReady,
    /// The payload of a completed sample could not be obtained
    ExtractionFailed(String),
}

impl CaptureError {
    /// Whether this error belongs to the "device unavailable" class
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            CaptureError::NoDevice
                | CaptureError::DeviceOpenFailed(_)
                | CaptureError::CannotAddInput
                | CaptureError::CannotAddOutput
        )
    }
}

impl EncoderError {
    /// Whether the failure affects one frame only
    pub fn is_per_frame(&self) -> bool {
        !matches!(
            self,
            EncoderError::CreationFailed(_) | EncoderError::PrepareFailed(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Encoder(e) => write!(f, "Encoder error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::PermissionDenied => write!(f, "Camera access denied"),
            CaptureError::NoDevice => write!(f, "No camera device available"),
            CaptureError::DeviceOpenFailed(msg) => write!(f, "Failed to open camera: {}", msg),
            CaptureError::CannotAddInput => write!(f, "Session cannot add the camera input"),
            CaptureError::CannotAddOutput => write!(f, "Session cannot add the frame output"),
            CaptureError::AlreadyConfigured => write!(f, "Capture session already configured"),
            CaptureError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::CreationFailed(msg) => write!(f, "Failed to create encoder: {}", msg),
            EncoderError::PrepareFailed(msg) => write!(f, "Failed to prepare encoder: {}", msg),
            EncoderError::SubmissionFailed(msg) => write!(f, "Frame submission failed: {}", msg),
            EncoderError::CompletionFailed(msg) => write!(f, "Frame encode failed: {}", msg),
            EncoderError::DataNotReady => write!(f, "Encoded sample data not ready"),
            EncoderError::ExtractionFailed(msg) => {
                write!(f, "Failed to extract encoded payload: {}", msg)
            }
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for EncoderError {}

impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<EncoderError> for AppError {
    fn from(err: EncoderError) -> Self {
        AppError::Encoder(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for CaptureError {
    fn from(err: gstreamer::glib::Error) -> Self {
        CaptureError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unavailable_class() {
        assert!(CaptureError::NoDevice.is_device_unavailable());
        assert!(CaptureError::CannotAddOutput.is_device_unavailable());
        assert!(!CaptureError::PermissionDenied.is_device_unavailable());
    }

    #[test]
    fn test_per_frame_classification() {
        assert!(EncoderError::DataNotReady.is_per_frame());
        assert!(EncoderError::SubmissionFailed("busy".into()).is_per_frame());
        assert!(!EncoderError::CreationFailed("no hardware".into()).is_per_frame());
    }

    #[test]
    fn test_app_error_wraps_sub_errors() {
        let err: AppError = CaptureError::PermissionDenied.into();
        assert_eq!(err.to_string(), "Capture error: Camera access denied");
    }
}
