// SPDX-License-Identifier: MPL-2.0

//! Camera capture backend abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │    CaptureSession    │  ← authorization, transaction, encoder publication
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │ CaptureBackend trait │  ← platform session primitives
//! └──────────┬───────────┘
//!            │
//!            ▼
//!     ┌─────────────┐
//!     │  GStreamer  │  ← concrete implementation
//!     └─────────────┘
//! ```
//!
//! Frames leave the backend through a single [`FrameOutput`] callback that
//! the backend invokes serially, in timestamp order.

pub mod gstreamer;
pub mod preview;
pub mod session;
pub mod types;

pub use self::gstreamer::GstCaptureBackend;
pub use preview::{PreviewImage, PreviewTap};
pub use session::{CaptureSession, SessionState};
pub use types::*;

use std::ops::{Deref, DerefMut};

/// Frame delivery callback attached as the session output
pub struct FrameOutput {
    callback: Box<dyn FnMut(RawFrame) + Send>,
}

impl FrameOutput {
    pub fn new(callback: impl FnMut(RawFrame) + Send + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Hand one frame to the output
    pub fn deliver(&mut self, frame: RawFrame) {
        (self.callback)(frame)
    }
}

impl std::fmt::Debug for FrameOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameOutput")
    }
}

/// Platform capture session primitives
///
/// Configuration calls are only made between
/// [`begin_configuration`](Self::begin_configuration) and
/// [`commit_configuration`](Self::commit_configuration); use
/// [`ConfigurationTransaction`] to pair them.
pub trait CaptureBackend: Send {
    /// An opened device input
    type Input: Send;

    /// The system default video input, if any
    fn default_video_device(&self) -> Option<CameraDevice>;

    /// Open a device for capture
    fn open_input(&mut self, device: &CameraDevice) -> BackendResult<Self::Input>;

    fn begin_configuration(&mut self);

    /// Apply a capture preset to the session
    fn set_preset(&mut self, preset: &CapturePreset) -> BackendResult<()>;

    fn can_add_input(&self, input: &Self::Input) -> bool;

    fn add_input(&mut self, input: Self::Input);

    fn can_add_output(&self) -> bool;

    fn add_output(&mut self, output: FrameOutput);

    /// Make the staged configuration visible to the running session
    fn commit_configuration(&mut self);

    /// Start delivering frames
    fn start_running(&mut self) -> BackendResult<()>;

    fn is_running(&self) -> bool;
}

/// Begin/commit bracket around session configuration
///
/// The configuration is committed when the guard is dropped, on every exit
/// path. Steps applied before a failure stay applied.
pub struct ConfigurationTransaction<'a, C: CaptureBackend> {
    backend: &'a mut C,
}

impl<'a, C: CaptureBackend> ConfigurationTransaction<'a, C> {
    pub fn begin(backend: &'a mut C) -> Self {
        backend.begin_configuration();
        Self { backend }
    }
}

impl<C: CaptureBackend> Deref for ConfigurationTransaction<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.backend
    }
}

impl<C: CaptureBackend> DerefMut for ConfigurationTransaction<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.backend
    }
}

impl<C: CaptureBackend> Drop for ConfigurationTransaction<'_, C> {
    fn drop(&mut self) {
        self.backend.commit_configuration();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Journal {
        calls: Vec<&'static str>,
    }

    impl CaptureBackend for Journal {
        type Input = ();

        fn default_video_device(&self) -> Option<CameraDevice> {
            None
        }

        fn open_input(&mut self, _device: &CameraDevice) -> BackendResult<()> {
            Ok(())
        }

        fn begin_configuration(&mut self) {
            self.calls.push("begin");
        }

        fn set_preset(&mut self, _preset: &CapturePreset) -> BackendResult<()> {
            self.calls.push("preset");
            Err(BackendError::FormatNotSupported("test".into()))
        }

        fn can_add_input(&self, _input: &()) -> bool {
            true
        }

        fn add_input(&mut self, _input: ()) {}

        fn can_add_output(&self) -> bool {
            true
        }

        fn add_output(&mut self, _output: FrameOutput) {}

        fn commit_configuration(&mut self) {
            self.calls.push("commit");
        }

        fn start_running(&mut self) -> BackendResult<()> {
            Ok(())
        }

        fn is_running(&self) -> bool {
            false
        }
    }

    fn configure(backend: &mut Journal) -> BackendResult<()> {
        let mut tx = ConfigurationTransaction::begin(backend);
        tx.set_preset(&CapturePreset::default())?;
        tx.calls.push("unreachable");
        Ok(())
    }

    #[test]
    fn test_transaction_commits_on_early_return() {
        let mut backend = Journal::default();
        assert!(configure(&mut backend).is_err());
        assert_eq!(backend.calls, ["begin", "preset", "commit"]);
    }

    #[test]
    fn test_frame_output_forwards_frames() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut output = FrameOutput::new(move |frame: RawFrame| {
            sink.lock().unwrap().push(frame.pts);
        });
        let frame = RawFrame::nv12_packed(2, 2, Duration::from_millis(33), Arc::from(vec![0u8; 6]));
        output.deliver(frame);
        assert_eq!(*seen.lock().unwrap(), [Duration::from_millis(33)]);
    }
}
