// SPDX-License-Identifier: GPL-3.0-only

//! Hardware encoder session lifecycle
//!
//! The session moves through three types:
//!
//! - [`EncoderSession::create`] allocates the hardware encoder (`Configured`)
//! - [`EncoderSession::prepare`] primes it and returns a [`ReadyEncoder`]
//! - only [`ReadyEncoder`] can [`submit`](ReadyEncoder::submit) frames
//!
//! Completions flow into a [`CompletionHandler`], which restores submission
//! order, drops failed or not-ready samples, extracts the payload and hands
//! it to the [`Sink`].

use crate::backends::camera::types::{CapturePreset, RawFrame};
use crate::constants::encoder;
use crate::errors::{EncoderError, EncoderResult};
use crate::media::formats::avcc::ParameterSets;
use crate::pipelines::video::handoff::{BitstreamExtractor, RetainedPayload};
use crate::pipelines::video::resequencer::Resequencer;
use crate::pipelines::video::sink::Sink;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observable encoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// No encoder has been created
    Uninitialized,
    /// Allocated but not yet primed
    Configured,
    /// Primed with nothing in flight
    Ready,
    /// Primed with n submissions awaiting completion
    Encoding(usize),
}

/// Fixed configuration of one encoder session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub expected_frame_rate: u32,
    pub bitrate_kbps: u32,
    /// Frames between key frames
    pub keyframe_interval: u32,
    /// Encoder element to use instead of the highest priority one
    pub encoder_override: Option<String>,
}

impl EncoderSettings {
    pub fn for_preset(preset: &CapturePreset) -> Self {
        Self {
            width: preset.width,
            height: preset.height,
            expected_frame_rate: encoder::EXPECTED_FRAME_RATE,
            bitrate_kbps: encoder::DEFAULT_BITRATE_KBPS,
            keyframe_interval: encoder::DEFAULT_KEYFRAME_INTERVAL,
            encoder_override: None,
        }
    }
}

/// One compressed output sample from the hardware encoder
pub trait CompressedSample: Send {
    /// Whether the encoded bytes are complete and readable
    fn is_data_ready(&self) -> bool;

    fn is_keyframe(&self) -> bool;

    /// Parameter sets in effect for this sample, if the encoder exposes them
    fn parameter_sets(&self) -> Option<Arc<ParameterSets>> {
        None
    }

    /// Take one extra reference to the payload without copying it
    fn retain_payload(self: Box<Self>) -> EncoderResult<Box<dyn RetainedPayload>>;
}

/// Completion event for one accepted submission
pub struct Completion {
    pub sequence: u64,
    pub pts: Duration,
    pub outcome: EncoderResult<Box<dyn CompressedSample>>,
}

impl Completion {
    pub fn success(sequence: u64, pts: Duration, sample: Box<dyn CompressedSample>) -> Self {
        Self {
            sequence,
            pts,
            outcome: Ok(sample),
        }
    }

    pub fn failure(sequence: u64, pts: Duration, error: EncoderError) -> Self {
        Self {
            sequence,
            pts,
            outcome: Err(error),
        }
    }
}

/// Platform encoder allocation
pub trait EncoderBackend: Send + 'static {
    type Session: HardwareEncoder;

    /// Allocate an encoder; completions must be reported to `completions`
    fn create_session(
        &mut self,
        settings: &EncoderSettings,
        completions: Arc<CompletionHandler>,
    ) -> EncoderResult<Self::Session>;
}

/// An allocated hardware encoder
pub trait HardwareEncoder: Send + Sync + 'static {
    /// Element or device name for logging
    fn name(&self) -> &str;

    /// Prime the hardware pipeline
    fn prepare(&mut self) -> EncoderResult<()>;

    /// Queue one frame; returns without waiting for the encode
    fn encode_frame(&self, sequence: u64, frame: &RawFrame) -> EncoderResult<()>;
}

/// Receives completions from any thread and forwards them to the sink in order
pub struct CompletionHandler {
    in_flight: AtomicUsize,
    resequencer: Mutex<Resequencer<Completion>>,
    extractor: BitstreamExtractor,
    sink: Arc<dyn Sink>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl CompletionHandler {
    pub fn new(sink: Arc<dyn Sink>) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            resequencer: Mutex::new(Resequencer::new(encoder::MAX_PENDING_COMPLETIONS)),
            extractor: BitstreamExtractor::new(),
            sink,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Report the outcome of one submission
    pub fn complete(&self, completion: Completion) {
        self.finish_one();
        let mut resequencer = self.resequencer.lock().unwrap();
        for (_, completion) in resequencer.push(completion.sequence, completion) {
            self.dispatch(completion);
        }
    }

    /// Submissions accepted but not yet completed
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Units handed to the sink
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Completions dropped because of failure, not-ready data or extraction errors
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn submitted(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// The encoder refused `sequence`; later completions must not wait for it
    fn abandon(&self, sequence: u64) {
        self.finish_one();
        let mut resequencer = self.resequencer.lock().unwrap();
        for (_, completion) in resequencer.abandon(sequence) {
            self.dispatch(completion);
        }
    }

    fn finish_one(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn dispatch(&self, completion: Completion) {
        let Completion {
            sequence,
            pts,
            outcome,
        } = completion;

        let sample = match outcome {
            Ok(sample) if sample.is_data_ready() => sample,
            Ok(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, error = %EncoderError::DataNotReady, "Dropping encoded frame");
                return;
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, error = %e, "Dropping encoded frame");
                return;
            }
        };

        match self.extractor.extract(sequence, pts, sample) {
            Ok(unit) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.sink.deliver(unit);
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, error = %e, "Dropping encoded frame");
            }
        }
    }
}

/// An allocated encoder that has not been primed
pub struct EncoderSession<H: HardwareEncoder> {
    hardware: H,
    settings: EncoderSettings,
    completions: Arc<CompletionHandler>,
}

impl<H: HardwareEncoder> EncoderSession<H> {
    /// Allocate a hardware encoder for `settings`
    pub fn create<B>(
        backend: &mut B,
        settings: EncoderSettings,
        sink: Arc<dyn Sink>,
    ) -> EncoderResult<Self>
    where
        B: EncoderBackend<Session = H>,
    {
        let completions = CompletionHandler::new(sink);
        let hardware = backend.create_session(&settings, Arc::clone(&completions))?;
        info!(
            encoder = hardware.name(),
            width = settings.width,
            height = settings.height,
            fps = settings.expected_frame_rate,
            bitrate_kbps = settings.bitrate_kbps,
            "Created hardware encoder session"
        );
        Ok(Self {
            hardware,
            settings,
            completions,
        })
    }

    pub fn state(&self) -> EncoderState {
        EncoderState::Configured
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Prime the encoder; the returned handle is the only one that accepts frames
    pub fn prepare(mut self) -> EncoderResult<ReadyEncoder<H>> {
        self.hardware.prepare()?;
        debug!(encoder = self.hardware.name(), "Encoder prepared");
        Ok(ReadyEncoder {
            hardware: self.hardware,
            settings: self.settings,
            completions: self.completions,
            next_sequence: AtomicU64::new(0),
        })
    }
}

/// A primed encoder accepting frames
pub struct ReadyEncoder<H: HardwareEncoder> {
    hardware: H,
    settings: EncoderSettings,
    completions: Arc<CompletionHandler>,
    next_sequence: AtomicU64,
}

impl<H: HardwareEncoder> ReadyEncoder<H> {
    /// Queue one frame for encoding
    ///
    /// On failure the frame is dropped; later frames are unaffected.
    pub fn submit(&self, frame: &RawFrame) -> EncoderResult<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.completions.submitted();

        if let Err(e) = self.hardware.encode_frame(sequence, frame) {
            self.completions.abandon(sequence);
            return Err(e);
        }
        Ok(sequence)
    }

    pub fn state(&self) -> EncoderState {
        match self.completions.in_flight() {
            0 => EncoderState::Ready,
            n => EncoderState::Encoding(n),
        }
    }

    pub fn name(&self) -> &str {
        self.hardware.name()
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Frames submitted so far, including refused ones
    pub fn submitted(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    pub fn completions(&self) -> &Arc<CompletionHandler> {
        &self.completions
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }
}
