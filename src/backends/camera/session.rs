// SPDX-License-Identifier: GPL-3.0-only

//! Capture session
//!
//! Binds the default camera at the capture preset to a single frame output
//! and wires that output to the preview tap and the hardware encoder.
//!
//! Configuration is soft-failing: every failure is logged and returned, and
//! nothing is retried. The encoder is published once through a `OnceLock`;
//! the frame router on the delivery thread is its only reader.

use super::preview::PreviewTap;
use super::types::{CapturePreset, RawFrame};
use super::{CaptureBackend, ConfigurationTransaction, FrameOutput};
use crate::backends::authorization::{AccessPlatform, AuthorizationGate};
use crate::constants::timing;
use crate::errors::{AppResult, CaptureError, CaptureResult};
use crate::media::encoders::session::{
    EncoderBackend, EncoderSession, EncoderSettings, EncoderState, HardwareEncoder, ReadyEncoder,
};
use crate::pipelines::video::sink::{Sink, StreamType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

/// Capture session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Configuration committed, not yet started
    Configuring,
    Running,
}

/// Routes each captured frame to the preview tap and the encoder
pub struct FrameRouter<H: HardwareEncoder> {
    encoder: OnceLock<ReadyEncoder<H>>,
    preview: Arc<PreviewTap>,
    frames: AtomicU64,
    submission_failures: AtomicU64,
}

impl<H: HardwareEncoder> FrameRouter<H> {
    fn new(preview: Arc<PreviewTap>) -> Self {
        Self {
            encoder: OnceLock::new(),
            preview,
            frames: AtomicU64::new(0),
            submission_failures: AtomicU64::new(0),
        }
    }

    /// The published encoder, once it is ready
    pub fn encoder(&self) -> Option<&ReadyEncoder<H>> {
        self.encoder.get()
    }

    /// Handle one captured frame on the delivery thread
    pub fn route(&self, frame: RawFrame) {
        let frame_num = self.frames.fetch_add(1, Ordering::Relaxed);

        self.preview.offer(&frame);

        let Some(encoder) = self.encoder.get() else {
            if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                debug!(frame = frame_num, "No encoder ready, frame not encoded");
            }
            return;
        };

        if let Err(e) = encoder.submit(&frame) {
            let failures = self.submission_failures.fetch_add(1, Ordering::Relaxed);
            if failures % timing::FRAME_LOG_INTERVAL == 0 {
                warn!(
                    frame = frame_num,
                    pts_ms = frame.pts.as_millis() as u64,
                    failures = failures + 1,
                    error = %e,
                    "Frame submission failed, dropping frame"
                );
            }
        }
    }

    /// Frames delivered by the capture backend
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn submission_failures(&self) -> u64 {
        self.submission_failures.load(Ordering::Relaxed)
    }

    fn publish(&self, encoder: ReadyEncoder<H>) -> bool {
        self.encoder.set(encoder).is_ok()
    }
}

/// Camera to encoder capture session
pub struct CaptureSession<C, E, A>
where
    C: CaptureBackend,
    E: EncoderBackend,
    A: AccessPlatform,
{
    backend: C,
    encoders: E,
    gate: AuthorizationGate<A>,
    sink: Arc<dyn Sink>,
    router: Arc<FrameRouter<E::Session>>,
    preview: Arc<PreviewTap>,
    preset: CapturePreset,
    settings: EncoderSettings,
    state: SessionState,
    attached: bool,
}

impl<C, E, A> CaptureSession<C, E, A>
where
    C: CaptureBackend,
    E: EncoderBackend,
    A: AccessPlatform,
{
    /// Create an idle session and announce the video stream to the sink
    pub fn new(backend: C, encoders: E, platform: A, sink: Arc<dyn Sink>) -> Self {
        let preset = CapturePreset::default();
        let settings = EncoderSettings::for_preset(&preset);
        let preview = Arc::new(PreviewTap::new());

        sink.start_stream(StreamType::Video);

        Self {
            backend,
            encoders,
            gate: AuthorizationGate::new(platform),
            sink,
            router: Arc::new(FrameRouter::new(Arc::clone(&preview))),
            preview,
            preset,
            settings,
            state: SessionState::Idle,
            attached: false,
        }
    }

    /// Replace the encoder settings used by [`configure`](Self::configure)
    ///
    /// Width and height always follow the capture preset.
    pub fn with_encoder_settings(mut self, settings: EncoderSettings) -> Self {
        self.settings = EncoderSettings {
            width: self.preset.width,
            height: self.preset.height,
            ..settings
        };
        self
    }

    /// Bind the default camera, attach the frame output and create the encoder
    ///
    /// All session mutations happen inside one configuration transaction,
    /// which is committed even when a step fails. An `Err` means the
    /// pipeline will never encode. Only an `Idle` session can be configured;
    /// any later call returns [`CaptureError::AlreadyConfigured`], including
    /// after a failed attempt or an idle [`start`](Self::start).
    pub async fn configure(&mut self) -> AppResult<()> {
        if self.state != SessionState::Idle {
            warn!(state = ?self.state, "Capture session already configured");
            return Err(CaptureError::AlreadyConfigured.into());
        }

        let result = self.try_configure().await;
        match &result {
            Ok(()) => info!(
                encoder = ?self.router.encoder().map(|e| e.name().to_string()),
                "Capture session configured"
            ),
            Err(e) => error!(error = %e, "Capture session configuration failed"),
        }
        result
    }

    async fn try_configure(&mut self) -> AppResult<()> {
        if !self.gate.check_or_request_access().await {
            return Err(CaptureError::PermissionDenied.into());
        }

        let device = self
            .backend
            .default_video_device()
            .ok_or(CaptureError::NoDevice)?;
        let input = self.backend.open_input(&device).map_err(|e| {
            CaptureError::DeviceOpenFailed(format!("{}: {}", device.name, e))
        })?;
        info!(device = %device.name, path = %device.path, "Binding camera");

        let mut transaction = ConfigurationTransaction::begin(&mut self.backend);
        self.state = SessionState::Configuring;

        transaction
            .set_preset(&self.preset)
            .map_err(CaptureError::from)?;

        if !transaction.can_add_input(&input) {
            return Err(CaptureError::CannotAddInput.into());
        }
        transaction.add_input(input);

        if !transaction.can_add_output() {
            return Err(CaptureError::CannotAddOutput.into());
        }
        let router = Arc::clone(&self.router);
        transaction.add_output(FrameOutput::new(move |frame| router.route(frame)));
        self.attached = true;

        let encoder = EncoderSession::create(
            &mut self.encoders,
            self.settings.clone(),
            Arc::clone(&self.sink),
        )?
        .prepare()?;
        if !self.router.publish(encoder) {
            warn!("Encoder already published, keeping the first one");
        }
        Ok(())
    }

    /// Start frame delivery
    ///
    /// Re-checks authorization. A session whose configuration did not attach
    /// an input and output still moves to `Running` but delivers nothing.
    pub async fn start(&mut self) -> CaptureResult<()> {
        if !self.gate.check_or_request_access().await {
            warn!("Camera access denied, not starting capture");
            return Err(CaptureError::PermissionDenied);
        }
        if self.state == SessionState::Running {
            debug!("Capture session already running");
            return Ok(());
        }

        if !self.attached {
            warn!("Starting capture session without input and output, no frames will be delivered");
            self.state = SessionState::Running;
            return Ok(());
        }

        self.backend.start_running().map_err(|e| {
            error!(error = %e, "Failed to start capture");
            CaptureError::from(e)
        })?;
        self.state = SessionState::Running;

        if self.router.encoder().is_none() {
            warn!("Capture running without an encoder, frames reach the preview only");
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session runs with an attached input and output
    pub fn is_delivering(&self) -> bool {
        self.state == SessionState::Running && self.attached
    }

    pub fn encoder_state(&self) -> EncoderState {
        self.router
            .encoder()
            .map_or(EncoderState::Uninitialized, |encoder| encoder.state())
    }

    pub fn encoder(&self) -> Option<&ReadyEncoder<E::Session>> {
        self.router.encoder()
    }

    pub fn preview(&self) -> &Arc<PreviewTap> {
        &self.preview
    }

    pub fn router(&self) -> &Arc<FrameRouter<E::Session>> {
        &self.router
    }

    pub fn backend(&self) -> &C {
        &self.backend
    }

    pub fn authorization(&self) -> &AuthorizationGate<A> {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::authorization::AuthorizationStatus;
    use crate::backends::camera::types::{BackendResult, CameraDevice};
    use crate::errors::{AppError, EncoderError, EncoderResult};
    use crate::media::encoders::session::CompletionHandler;
    use crate::pipelines::video::handoff::EncodedUnit;
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Allow(bool);

    impl AccessPlatform for Allow {
        fn authorization_status(&self) -> AuthorizationStatus {
            if self.0 {
                AuthorizationStatus::Authorized
            } else {
                AuthorizationStatus::Denied
            }
        }

        fn request_access(&self) -> impl Future<Output = bool> + Send {
            std::future::ready(self.0)
        }
    }

    #[derive(Default)]
    struct Camera {
        output: Option<FrameOutput>,
        commits: usize,
        running: bool,
    }

    impl CaptureBackend for Camera {
        type Input = ();

        fn default_video_device(&self) -> Option<CameraDevice> {
            Some(CameraDevice::pipewire_default())
        }

        fn open_input(&mut self, _device: &CameraDevice) -> BackendResult<()> {
            Ok(())
        }

        fn begin_configuration(&mut self) {}

        fn set_preset(&mut self, _preset: &CapturePreset) -> BackendResult<()> {
            Ok(())
        }

        fn can_add_input(&self, _input: &()) -> bool {
            true
        }

        fn add_input(&mut self, _input: ()) {}

        fn can_add_output(&self) -> bool {
            self.output.is_none()
        }

        fn add_output(&mut self, output: FrameOutput) {
            self.output = Some(output);
        }

        fn commit_configuration(&mut self) {
            self.commits += 1;
        }

        fn start_running(&mut self) -> BackendResult<()> {
            self.running = true;
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    struct Refusing;

    impl HardwareEncoder for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        fn prepare(&mut self) -> EncoderResult<()> {
            Ok(())
        }

        fn encode_frame(&self, _sequence: u64, _frame: &RawFrame) -> EncoderResult<()> {
            Err(EncoderError::SubmissionFailed("full".into()))
        }
    }

    struct Encoders {
        fail: bool,
    }

    impl EncoderBackend for Encoders {
        type Session = Refusing;

        fn create_session(
            &mut self,
            _settings: &EncoderSettings,
            _completions: Arc<CompletionHandler>,
        ) -> EncoderResult<Refusing> {
            if self.fail {
                Err(EncoderError::CreationFailed("no hardware".into()))
            } else {
                Ok(Refusing)
            }
        }
    }

    #[derive(Default)]
    struct Streams(Mutex<Vec<StreamType>>);

    impl Sink for Streams {
        fn start_stream(&self, stream_type: StreamType) {
            self.0.lock().unwrap().push(stream_type);
        }

        fn deliver(&self, _unit: EncodedUnit) {}
    }

    fn session(
        allowed: bool,
        encoder_fails: bool,
    ) -> (CaptureSession<Camera, Encoders, Allow>, Arc<Streams>) {
        let sink = Arc::new(Streams::default());
        let session = CaptureSession::new(
            Camera::default(),
            Encoders {
                fail: encoder_fails,
            },
            Allow(allowed),
            sink.clone(),
        );
        (session, sink)
    }

    #[tokio::test]
    async fn test_construction_announces_video_stream() {
        let (session, sink) = session(true, false);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(*sink.0.lock().unwrap(), [StreamType::Video]);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (mut session, _) = session(true, false);
        session.configure().await.unwrap();
        assert_eq!(session.state(), SessionState::Configuring);
        assert_eq!(session.encoder_state(), EncoderState::Ready);
        assert_eq!(session.backend().commits, 1);

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.is_delivering());
        assert!(session.backend().is_running());
    }

    #[tokio::test]
    async fn test_start_before_configure_runs_idle() {
        let (mut session, _) = session(true, false);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(!session.is_delivering());
        assert!(!session.backend().is_running());
    }

    #[tokio::test]
    async fn test_configure_after_idle_start_is_rejected() {
        let (mut session, _) = session(true, false);
        session.start().await.unwrap();
        assert!(matches!(
            session.configure().await,
            Err(AppError::Capture(CaptureError::AlreadyConfigured))
        ));
        assert_eq!(session.backend().commits, 0);
        assert_eq!(session.encoder_state(), EncoderState::Uninitialized);
    }

    #[tokio::test]
    async fn test_denied_start_stays_idle() {
        let (mut session, _) = session(false, false);
        assert!(matches!(
            session.configure().await,
            Err(AppError::Capture(CaptureError::PermissionDenied))
        ));
        assert_eq!(
            session.start().await,
            Err(CaptureError::PermissionDenied)
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.backend().commits, 0);
    }

    #[tokio::test]
    async fn test_encoder_failure_still_commits() {
        let (mut session, _) = session(true, true);
        assert!(matches!(
            session.configure().await,
            Err(AppError::Encoder(EncoderError::CreationFailed(_)))
        ));
        assert_eq!(session.backend().commits, 1);
        assert_eq!(session.encoder_state(), EncoderState::Uninitialized);
    }

    #[tokio::test]
    async fn test_refused_frames_do_not_accumulate() {
        let (mut session, _) = session(true, false);
        session.configure().await.unwrap();
        for ms in [0u64, 33, 66] {
            let frame =
                RawFrame::nv12_packed(2, 2, Duration::from_millis(ms), Arc::from(vec![0u8; 6]));
            session.router().route(frame);
        }
        assert_eq!(session.router().frames(), 3);
        assert_eq!(session.router().submission_failures(), 3);
        assert_eq!(session.encoder_state(), EncoderState::Ready);
    }
}
