// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles shared by the integration tests

#![allow(dead_code)]

use rtp_camera::backends::authorization::{AccessPlatform, AuthorizationStatus};
use rtp_camera::backends::camera::{
    BackendResult, CameraDevice, CaptureBackend, CapturePreset, FrameOutput, RawFrame,
};
use rtp_camera::errors::{EncoderError, EncoderResult};
use rtp_camera::media::encoders::session::{
    Completion, CompletionHandler, CompressedSample, EncoderBackend, EncoderSettings,
    HardwareEncoder,
};
use rtp_camera::pipelines::video::handoff::{EncodedUnit, RetainedPayload};
use rtp_camera::pipelines::video::sink::{Sink, StreamType};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;

/// A tiny NV12 frame at `pts_ms`
pub fn frame(pts_ms: u64) -> RawFrame {
    let data: Vec<u8> = vec![128; (WIDTH * HEIGHT * 3 / 2) as usize];
    RawFrame::nv12_packed(WIDTH, HEIGHT, Duration::from_millis(pts_ms), data.into())
}

/// Length-prefixed access unit with one NAL unit
pub fn access_unit(marker: u8) -> Arc<Vec<u8>> {
    Arc::new(vec![0, 0, 0, 3, 0x65, 0x88, marker])
}

// ===== Authorization =====

/// Platform answering with a fixed status and prompt result
pub struct ScriptedAccess {
    pub status: AuthorizationStatus,
    pub answer: bool,
    pub prompts: Arc<AtomicUsize>,
}

impl ScriptedAccess {
    pub fn authorized() -> Self {
        Self::new(AuthorizationStatus::Authorized, true)
    }

    pub fn denied() -> Self {
        Self::new(AuthorizationStatus::Denied, false)
    }

    pub fn new(status: AuthorizationStatus, answer: bool) -> Self {
        Self {
            status,
            answer,
            prompts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AccessPlatform for ScriptedAccess {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.status
    }

    fn request_access(&self) -> impl Future<Output = bool> + Send {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        std::future::ready(self.answer)
    }
}

// ===== Capture =====

/// What a [`RecordingCamera`] was asked to do
#[derive(Debug, Default)]
pub struct CameraLog {
    pub opened: usize,
    pub begins: usize,
    pub commits: usize,
    pub inputs: usize,
    pub outputs: usize,
    pub started: usize,
}

impl CameraLog {
    pub fn attach_calls(&self) -> usize {
        self.inputs + self.outputs
    }
}

/// Capture backend double that records calls and lets tests push frames
#[derive(Clone, Default)]
pub struct RecordingCamera {
    pub log: Arc<Mutex<CameraLog>>,
    pub output: Arc<Mutex<Option<FrameOutput>>>,
    pub no_device: bool,
    pub reject_output: bool,
    pub running: bool,
}

impl RecordingCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver frames the way the capture thread would, serially
    pub fn push(&self, frames: impl IntoIterator<Item = RawFrame>) {
        let mut output = self.output.lock().unwrap();
        let output = output.as_mut().expect("no output attached");
        for frame in frames {
            output.deliver(frame);
        }
    }

    pub fn has_output(&self) -> bool {
        self.output.lock().unwrap().is_some()
    }
}

impl CaptureBackend for RecordingCamera {
    type Input = CameraDevice;

    fn default_video_device(&self) -> Option<CameraDevice> {
        (!self.no_device).then(|| CameraDevice {
            name: "Test Camera".into(),
            path: "/dev/video-test".into(),
            device_class: "Video/Source".into(),
        })
    }

    fn open_input(&mut self, device: &CameraDevice) -> BackendResult<CameraDevice> {
        self.log.lock().unwrap().opened += 1;
        Ok(device.clone())
    }

    fn begin_configuration(&mut self) {
        self.log.lock().unwrap().begins += 1;
    }

    fn set_preset(&mut self, _preset: &CapturePreset) -> BackendResult<()> {
        Ok(())
    }

    fn can_add_input(&self, _input: &CameraDevice) -> bool {
        true
    }

    fn add_input(&mut self, _input: CameraDevice) {
        self.log.lock().unwrap().inputs += 1;
    }

    fn can_add_output(&self) -> bool {
        !self.reject_output && !self.has_output()
    }

    fn add_output(&mut self, output: FrameOutput) {
        self.log.lock().unwrap().outputs += 1;
        *self.output.lock().unwrap() = Some(output);
    }

    fn commit_configuration(&mut self) {
        self.log.lock().unwrap().commits += 1;
    }

    fn start_running(&mut self) -> BackendResult<()> {
        self.log.lock().unwrap().started += 1;
        self.running = true;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

// ===== Encoder =====

/// Shared view into a [`ScriptedEncoders`] session
#[derive(Default)]
pub struct EncoderLog {
    pub created: AtomicUsize,
    pub submissions: Mutex<Vec<(u64, Duration)>>,
    pub completions: Mutex<Option<Arc<CompletionHandler>>>,
}

impl EncoderLog {
    pub fn submitted(&self) -> Vec<(u64, Duration)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn handler(&self) -> Arc<CompletionHandler> {
        self.completions
            .lock()
            .unwrap()
            .clone()
            .expect("no encoder session created")
    }

    /// Complete `sequence` with a sample carrying `payload`
    pub fn complete(&self, sequence: u64, ready: bool, payload: &Arc<Vec<u8>>) {
        let pts = self.pts_of(sequence);
        self.handler().complete(Completion::success(
            sequence,
            pts,
            Box::new(TestSample {
                ready,
                keyframe: sequence == 0,
                payload: Arc::clone(payload),
            }),
        ));
    }

    pub fn fail(&self, sequence: u64) {
        let pts = self.pts_of(sequence);
        self.handler().complete(Completion::failure(
            sequence,
            pts,
            EncoderError::CompletionFailed("simulated".into()),
        ));
    }

    fn pts_of(&self, sequence: u64) -> Duration {
        self.submitted()
            .into_iter()
            .find(|(s, _)| *s == sequence)
            .map_or(Duration::ZERO, |(_, pts)| pts)
    }
}

/// Encoder backend whose sessions never complete on their own
#[derive(Default)]
pub struct ScriptedEncoders {
    pub encoder_log: Arc<EncoderLog>,
    pub fail_create: bool,
    /// Sequence numbers whose submission is refused
    pub refuse: HashSet<u64>,
}

impl ScriptedEncoders {
    pub fn new() -> (Self, Arc<EncoderLog>) {
        let encoders = Self::default();
        let encoder_log = Arc::clone(&encoders.encoder_log);
        (encoders, encoder_log)
    }
}

impl EncoderBackend for ScriptedEncoders {
    type Session = ScriptedEncoder;

    fn create_session(
        &mut self,
        _settings: &EncoderSettings,
        completions: Arc<CompletionHandler>,
    ) -> EncoderResult<ScriptedEncoder> {
        if self.fail_create {
            return Err(EncoderError::CreationFailed("allocator refused".into()));
        }
        self.encoder_log.created.fetch_add(1, Ordering::SeqCst);
        *self.encoder_log.completions.lock().unwrap() = Some(completions);
        Ok(ScriptedEncoder {
            encoder_log: Arc::clone(&self.encoder_log),
            refuse: self.refuse.clone(),
        })
    }
}

pub struct ScriptedEncoder {
    encoder_log: Arc<EncoderLog>,
    refuse: HashSet<u64>,
}

impl HardwareEncoder for ScriptedEncoder {
    fn name(&self) -> &str {
        "scripted"
    }

    fn prepare(&mut self) -> EncoderResult<()> {
        Ok(())
    }

    fn encode_frame(&self, sequence: u64, frame: &RawFrame) -> EncoderResult<()> {
        if self.refuse.contains(&sequence) {
            return Err(EncoderError::SubmissionFailed("queue full".into()));
        }
        self.encoder_log
            .submissions
            .lock()
            .unwrap()
            .push((sequence, frame.pts));
        Ok(())
    }
}

/// Payload whose strong count shows whether the core still holds it
pub struct TestPayload(pub Arc<Vec<u8>>);

// Vec storage stays put while the Arc is alive.
unsafe impl RetainedPayload for TestPayload {
    fn bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

pub struct TestSample {
    pub ready: bool,
    pub keyframe: bool,
    pub payload: Arc<Vec<u8>>,
}

impl CompressedSample for TestSample {
    fn is_data_ready(&self) -> bool {
        self.ready
    }

    fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    fn retain_payload(self: Box<Self>) -> EncoderResult<Box<dyn RetainedPayload>> {
        Ok(Box::new(TestPayload(self.payload)))
    }
}

// ===== Sink =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Started(StreamType),
    Delivered { sequence: u64, pts: Duration },
}

/// Sink that keeps delivered units until the test releases them
#[derive(Default)]
pub struct HoldingSink {
    pub events: Mutex<Vec<SinkEvent>>,
    pub held: Mutex<Vec<EncodedUnit>>,
}

impl HoldingSink {
    pub fn delivered(&self) -> Vec<u64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Delivered { sequence, .. } => Some(*sequence),
                SinkEvent::Started(_) => None,
            })
            .collect()
    }

    pub fn take(&self) -> Vec<EncodedUnit> {
        std::mem::take(&mut *self.held.lock().unwrap())
    }
}

impl Sink for HoldingSink {
    fn start_stream(&self, stream_type: StreamType) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Started(stream_type));
    }

    fn deliver(&self, unit: EncodedUnit) {
        self.events.lock().unwrap().push(SinkEvent::Delivered {
            sequence: unit.sequence(),
            pts: unit.pts(),
        });
        self.held.lock().unwrap().push(unit);
    }
}
