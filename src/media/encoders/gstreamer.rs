// SPDX-License-Identifier: GPL-3.0-only

//! GStreamer hardware encoder session
//!
//! ```text
//! appsrc ! videoconvert ! <hw h264 encoder> ! h264parse
//!        ! video/x-h264,stream-format=avc,alignment=au,profile=main ! appsink
//! ```
//!
//! Frames enter through `appsrc` by reference. Encoded access units leave
//! through the `appsink` callback on the encoder's streaming thread, where
//! they are matched back to their submission sequence by PTS.

use super::session::{
    CompletionHandler, CompressedSample, Completion, EncoderBackend, EncoderSettings,
    HardwareEncoder,
};
use super::video::{
    EncoderInfo, EncoderSpec, first_working, installed_video_encoders, make_video_encoder,
};
use crate::backends::camera::types::RawFrame;
use crate::constants::{capture, encoder, pipeline, timing};
use crate::errors::{EncoderError, EncoderResult};
use crate::media::formats::avcc::ParameterSets;
use crate::pipelines::video::handoff::RetainedPayload;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppLeakyType, AppSink, AppSrc};
use gstreamer_video as gst_video;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

static OUTPUT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocates [`GstHardwareEncoder`] sessions
#[derive(Debug, Default)]
pub struct GstEncoderBackend;

impl EncoderBackend for GstEncoderBackend {
    type Session = GstHardwareEncoder;

    fn create_session(
        &mut self,
        settings: &EncoderSettings,
        completions: Arc<CompletionHandler>,
    ) -> EncoderResult<GstHardwareEncoder> {
        GstHardwareEncoder::new(settings, completions)
    }
}

/// Submissions waiting for encoder output, oldest first
#[derive(Debug, Default)]
pub struct PendingFrames {
    frames: VecDeque<(gst::ClockTime, u64)>,
}

/// Result of matching one encoder output against pending submissions
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OutputMatch {
    /// Submissions the encoder skipped, in order
    pub skipped: Vec<(u64, gst::ClockTime)>,
    /// Submission this output belongs to
    pub matched: Option<(u64, gst::ClockTime)>,
}

impl PendingFrames {
    pub fn push(&mut self, pts: gst::ClockTime, sequence: u64) {
        self.frames.push_back((pts, sequence));
    }

    /// Register a submission unless `limit` frames are already outstanding
    pub fn try_push(&mut self, pts: gst::ClockTime, sequence: u64, limit: usize) -> bool {
        if self.frames.len() >= limit {
            return false;
        }
        self.push(pts, sequence);
        true
    }

    /// Forget a submission the encoder refused
    pub fn remove(&mut self, sequence: u64) {
        self.frames.retain(|(_, seq)| *seq != sequence);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Match an output PTS; older pending entries were dropped by the encoder
    pub fn match_output(&mut self, pts: Option<gst::ClockTime>) -> OutputMatch {
        let mut result = OutputMatch::default();

        let Some(pts) = pts else {
            result.matched = self.frames.pop_front().map(|(pts, seq)| (seq, pts));
            return result;
        };

        while let Some(&(pending_pts, sequence)) = self.frames.front() {
            if pending_pts < pts {
                self.frames.pop_front();
                result.skipped.push((sequence, pending_pts));
            } else {
                if pending_pts == pts {
                    self.frames.pop_front();
                    result.matched = Some((sequence, pending_pts));
                }
                break;
            }
        }
        result
    }
}

/// Parameter sets parsed from the negotiated caps, cached per caps
#[derive(Default)]
struct ParameterSetCache {
    caps: Option<gst::Caps>,
    sets: Option<Arc<ParameterSets>>,
}

impl ParameterSetCache {
    fn lookup(&mut self, caps: Option<&gst::CapsRef>) -> Option<Arc<ParameterSets>> {
        let caps = caps?;
        if self.caps.as_deref() == Some(caps) {
            return self.sets.clone();
        }

        let sets = caps
            .structure(0)
            .and_then(|s| s.get::<gst::Buffer>("codec_data").ok())
            .and_then(|codec_data| {
                let map = codec_data.map_readable().ok()?;
                match ParameterSets::from_avcc(map.as_slice()) {
                    Ok(sets) => Some(Arc::new(sets)),
                    Err(e) => {
                        warn!(error = %e, "Failed to parse codec_data");
                        None
                    }
                }
            });

        debug!(has_parameter_sets = sets.is_some(), "Encoder output caps changed");
        self.caps = Some(caps.to_owned());
        self.sets = sets.clone();
        sets
    }
}

/// One encoded access unit still owned by GStreamer
struct GstEncodedSample {
    buffer: gst::Buffer,
    keyframe: bool,
    ready: bool,
    parameter_sets: Option<Arc<ParameterSets>>,
}

impl CompressedSample for GstEncodedSample {
    fn is_data_ready(&self) -> bool {
        self.ready
    }

    fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    fn parameter_sets(&self) -> Option<Arc<ParameterSets>> {
        self.parameter_sets.clone()
    }

    fn retain_payload(self: Box<Self>) -> EncoderResult<Box<dyn RetainedPayload>> {
        let mapped = self.buffer.into_mapped_buffer_readable().map_err(|_| {
            EncoderError::ExtractionFailed("failed to map encoded buffer".to_string())
        })?;
        Ok(Box::new(mapped))
    }
}

/// Configure the encoder input as a live source that never blocks
///
/// Once `max-bytes` of frames are queued, new frames are dropped at the
/// source instead of growing the queue.
fn configure_input(appsrc: &AppSrc, settings: &EncoderSettings) {
    let fps = settings.expected_frame_rate.max(1) as i32;
    let input_caps = gst::Caps::builder("video/x-raw")
        .field("format", capture::PIXEL_FORMAT)
        .field("width", settings.width as i32)
        .field("height", settings.height as i32)
        .field("framerate", gst::Fraction::new(fps, 1))
        .build();
    appsrc.set_caps(Some(&input_caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_is_live(true);
    appsrc.set_do_timestamp(false);
    // A stalled encoder must not block the capture thread
    appsrc.set_property("block", false);
    appsrc.set_leaky_type(AppLeakyType::Upstream);
    let frame_bytes = settings.width as u64 * settings.height as u64 * 3 / 2;
    appsrc.set_max_bytes(frame_bytes * encoder::MAX_PENDING_COMPLETIONS as u64);
}

/// Hardware H.264 encoder running in its own GStreamer pipeline
pub struct GstHardwareEncoder {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    info: EncoderInfo,
    pending: Arc<Mutex<PendingFrames>>,
    frame_duration: gst::ClockTime,
    settings: EncoderSettings,
    completions: Arc<CompletionHandler>,
    /// Installed encoders not tried yet, used when this one fails to start
    fallbacks: Vec<&'static EncoderSpec>,
    playing: bool,
}

impl GstHardwareEncoder {
    /// Build a pipeline around the best installed encoder that links
    pub fn new(
        settings: &EncoderSettings,
        completions: Arc<CompletionHandler>,
    ) -> EncoderResult<Self> {
        let candidates = installed_video_encoders(settings)?;
        Self::open_first(&candidates, settings, completions)
    }

    fn open_first(
        candidates: &[&'static EncoderSpec],
        settings: &EncoderSettings,
        completions: Arc<CompletionHandler>,
    ) -> EncoderResult<Self> {
        let (mut session, fallbacks) = first_working(candidates, |spec| {
            Self::build(spec, settings, Arc::clone(&completions))
        })?;
        session.fallbacks = fallbacks;
        Ok(session)
    }

    fn build(
        spec: &'static EncoderSpec,
        settings: &EncoderSettings,
        completions: Arc<CompletionHandler>,
    ) -> EncoderResult<Self> {
        let encoder = make_video_encoder(spec, settings)?;
        let info = EncoderInfo::from(spec);
        let session_completions = Arc::clone(&completions);
        let creation = |what: &str, e: &dyn std::fmt::Display| {
            EncoderError::CreationFailed(format!("Failed to create {}: {}", what, e))
        };

        let appsrc = gst::ElementFactory::make("appsrc")
            .name("encoder-src")
            .build()
            .map_err(|e| creation("appsrc", &e))?
            .downcast::<AppSrc>()
            .map_err(|_| EncoderError::CreationFailed("Failed to downcast to AppSrc".into()))?;

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .property("n-threads", pipeline::videoconvert_threads())
            .build()
            .map_err(|e| creation("videoconvert", &e))?;

        let parser = gst::ElementFactory::make("h264parse")
            .build()
            .map_err(|e| creation("h264parse", &e))?;

        let output_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au")
            .field("profile", encoder::PROFILE)
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", output_caps)
            .build()
            .map_err(|e| creation("capsfilter", &e))?;

        let appsink = gst::ElementFactory::make("appsink")
            .name("encoder-sink")
            .build()
            .map_err(|e| creation("appsink", &e))?
            .downcast::<AppSink>()
            .map_err(|_| EncoderError::CreationFailed("Failed to downcast to AppSink".into()))?;

        configure_input(&appsrc, settings);

        appsink.set_property("emit-signals", false);
        appsink.set_property("sync", false);
        appsink.set_property("enable-last-sample", false);

        let pipeline = gst::Pipeline::with_name("hardware-encoder");
        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &videoconvert,
                &encoder,
                &parser,
                &capsfilter,
                appsink.upcast_ref(),
            ])
            .map_err(|e| creation("encoder pipeline", &e))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &videoconvert,
            &encoder,
            &parser,
            &capsfilter,
            appsink.upcast_ref(),
        ])
        .map_err(|e| {
            EncoderError::CreationFailed(format!(
                "{} cannot produce main profile AVC: {}",
                info.element_name, e
            ))
        })?;

        let pending = Arc::new(Mutex::new(PendingFrames::default()));
        let output_pending = Arc::clone(&pending);
        let mut parameter_sets = ParameterSetCache::default();

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let output_num = OUTPUT_COUNTER.fetch_add(1, Ordering::Relaxed);
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;

                    let Some(buffer) = sample.buffer_owned() else {
                        warn!(output = output_num, "Encoder sample without buffer");
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    let matched = output_pending.lock().unwrap().match_output(buffer.pts());
                    for (sequence, pts) in matched.skipped {
                        completions.complete(Completion::failure(
                            sequence,
                            Duration::from_nanos(pts.nseconds()),
                            EncoderError::CompletionFailed(
                                "encoder produced no output for frame".to_string(),
                            ),
                        ));
                    }

                    let Some((sequence, pts)) = matched.matched else {
                        debug!(
                            output = output_num,
                            pts = ?buffer.pts(),
                            "Encoder output without matching submission"
                        );
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    let flags = buffer.flags();
                    let keyframe = !flags.contains(gst::BufferFlags::DELTA_UNIT);
                    let ready =
                        !flags.intersects(gst::BufferFlags::CORRUPTED | gst::BufferFlags::GAP);
                    let sets = if keyframe {
                        parameter_sets.lookup(sample.caps())
                    } else {
                        None
                    };

                    if output_num % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            output = output_num,
                            sequence,
                            keyframe,
                            size = buffer.size(),
                            "Encoded access unit"
                        );
                    }

                    completions.complete(Completion::success(
                        sequence,
                        Duration::from_nanos(pts.nseconds()),
                        Box::new(GstEncodedSample {
                            buffer,
                            keyframe,
                            ready,
                            parameter_sets: sets,
                        }),
                    ));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let frame_duration =
            gst::ClockTime::from_nseconds(1_000_000_000 / settings.expected_frame_rate.max(1) as u64);

        Ok(Self {
            pipeline,
            appsrc,
            info,
            pending,
            frame_duration,
            settings: settings.clone(),
            completions: session_completions,
            fallbacks: Vec::new(),
            playing: false,
        })
    }

    pub fn info(&self) -> &EncoderInfo {
        &self.info
    }

    fn start_pipeline(&self) -> EncoderResult<()> {
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            EncoderError::PrepareFailed(format!("Failed to start encoder pipeline: {}", e))
        })?;
        self.check_bus_for_errors()
    }

    fn check_bus_for_errors(&self) -> EncoderResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        if let Some(msg) = bus.timed_pop_filtered(
            gst::ClockTime::from_mseconds(timing::BUS_ERROR_CHECK_MS),
            &[gst::MessageType::Error],
        ) && let gst::MessageView::Error(err) = msg.view()
        {
            error!(
                error = %err.error(),
                debug = ?err.debug(),
                source = ?err.src().map(|s| s.name()),
                "GStreamer error while preparing encoder"
            );
            return Err(EncoderError::PrepareFailed(err.error().to_string()));
        }
        Ok(())
    }
}

impl HardwareEncoder for GstHardwareEncoder {
    fn name(&self) -> &str {
        &self.info.element_name
    }

    /// Start the pipeline, moving on to the next installed encoder on failure
    fn prepare(&mut self) -> EncoderResult<()> {
        loop {
            match self.start_pipeline() {
                Ok(()) => {
                    self.playing = true;
                    info!(encoder = %self.info.element_name, "Encoder pipeline playing");
                    return Ok(());
                }
                Err(e) if !self.fallbacks.is_empty() => {
                    warn!(
                        encoder = %self.info.element_name,
                        error = %e,
                        "Encoder failed to start, trying next candidate"
                    );
                    let fallbacks = std::mem::take(&mut self.fallbacks);
                    *self =
                        Self::open_first(&fallbacks, &self.settings, Arc::clone(&self.completions))?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn encode_frame(&self, sequence: u64, frame: &RawFrame) -> EncoderResult<()> {
        let pts = gst::ClockTime::from_nseconds(frame.pts.as_nanos() as u64);
        let mut buffer = frame.data.to_gst_buffer();
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(pts);
            buffer.set_duration(self.frame_duration);
            if buffer.meta::<gst_video::VideoMeta>().is_none()
                && frame.stride_y != frame.width
            {
                gst_video::VideoMeta::add_full(
                    buffer,
                    gst_video::VideoFrameFlags::empty(),
                    gst_video::VideoFormat::Nv12,
                    frame.width,
                    frame.height,
                    &[0, frame.offset_uv],
                    &[frame.stride_y as i32, frame.stride_uv as i32],
                )
                .map_err(|e| EncoderError::SubmissionFailed(e.to_string()))?;
            }
        }

        // Registered before the push: output can arrive before push_buffer returns
        if !self
            .pending
            .lock()
            .unwrap()
            .try_push(pts, sequence, encoder::MAX_PENDING_COMPLETIONS)
        {
            return Err(EncoderError::SubmissionFailed(
                "encoder input queue full".to_string(),
            ));
        }

        if let Err(flow) = self.appsrc.push_buffer(buffer) {
            self.pending.lock().unwrap().remove(sequence);
            return Err(EncoderError::SubmissionFailed(format!(
                "appsrc refused frame: {:?}",
                flow
            )));
        }
        Ok(())
    }
}

impl Drop for GstHardwareEncoder {
    fn drop(&mut self) {
        debug!("Dropping encoder pipeline");
        // Let in-flight frames drain so their completions are reported
        if self.playing
            && self.appsrc.end_of_stream().is_ok()
            && let Some(bus) = self.pipeline.bus()
        {
            let drained = bus.timed_pop_filtered(
                gst::ClockTime::from_seconds(timing::STOP_TIMEOUT_SECS),
                &[gst::MessageType::Eos, gst::MessageType::Error],
            );
            if drained.is_none() {
                warn!("Encoder did not drain before timeout");
            }
        }
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            error!(?e, "Failed to set encoder pipeline to Null on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> gst::ClockTime {
        gst::ClockTime::from_mseconds(value)
    }

    #[test]
    fn test_output_matches_pending_in_order() {
        let mut pending = PendingFrames::default();
        pending.push(ms(0), 0);
        pending.push(ms(33), 1);

        let first = pending.match_output(Some(ms(0)));
        assert_eq!(first.matched, Some((0, ms(0))));
        assert!(first.skipped.is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_skipped_frames_are_reported() {
        let mut pending = PendingFrames::default();
        pending.push(ms(0), 0);
        pending.push(ms(33), 1);
        pending.push(ms(66), 2);

        let result = pending.match_output(Some(ms(66)));
        assert_eq!(result.skipped, vec![(0, ms(0)), (1, ms(33))]);
        assert_eq!(result.matched, Some((2, ms(66))));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_unknown_output_leaves_pending_untouched() {
        let mut pending = PendingFrames::default();
        pending.push(ms(66), 2);

        let result = pending.match_output(Some(ms(10)));
        assert_eq!(result, OutputMatch::default());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_outstanding_submissions_are_bounded() {
        let mut pending = PendingFrames::default();
        assert!(pending.try_push(ms(0), 0, 2));
        assert!(pending.try_push(ms(33), 1, 2));
        assert!(!pending.try_push(ms(66), 2, 2));
        assert_eq!(pending.len(), 2);

        pending.match_output(Some(ms(0)));
        assert!(pending.try_push(ms(66), 2, 2));
    }

    #[test]
    fn test_input_drops_new_frames_when_full() {
        gst::init().unwrap();
        let appsrc = gst::ElementFactory::make("appsrc")
            .build()
            .unwrap()
            .downcast::<AppSrc>()
            .unwrap();
        let settings = EncoderSettings::for_preset(
            &crate::backends::camera::types::CapturePreset::default(),
        );

        configure_input(&appsrc, &settings);

        assert_eq!(appsrc.leaky_type(), AppLeakyType::Upstream);
        assert!(!appsrc.property::<bool>("block"));
        assert!(appsrc.is_live());
        assert_eq!(
            appsrc.max_bytes(),
            1280 * 720 * 3 / 2 * encoder::MAX_PENDING_COMPLETIONS as u64
        );
    }

    #[test]
    fn test_refused_submission_is_forgotten() {
        let mut pending = PendingFrames::default();
        pending.push(ms(0), 0);
        pending.push(ms(33), 1);
        pending.remove(0);

        assert_eq!(pending.match_output(None).matched, Some((1, ms(33))));
    }
}
