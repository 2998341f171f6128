// SPDX-License-Identifier: MPL-2.0

//! GStreamer capture backend
//!
//! ```text
//! <device source> ! videoconvert ! video/x-raw,format=NV12,1280x720,30/1 ! appsink
//! ```
//!
//! Inputs and outputs are staged while a configuration is open and linked
//! into the pipeline on commit. The appsink callback runs on the pipeline's
//! streaming thread, which is the only thread that delivers frames.

use super::types::*;
use super::{CaptureBackend, FrameOutput};
use crate::constants::{pipeline, timing};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An opened camera source element
pub struct GstInput {
    pub device: CameraDevice,
    source: gst::Element,
}

impl std::fmt::Debug for GstInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GstInput")
            .field("device", &self.device)
            .field("source", &self.source.name())
            .finish()
    }
}

/// Output half of the capture pipeline
struct OutputChain {
    convert: gst::Element,
    capsfilter: gst::Element,
    appsink: AppSink,
}

#[derive(Default)]
struct Staged {
    preset: Option<CapturePreset>,
    input: Option<GstInput>,
    output: Option<FrameOutput>,
}

/// Camera capture through a GStreamer pipeline
pub struct GstCaptureBackend {
    pipeline: gst::Pipeline,
    preset: CapturePreset,
    staged: Staged,
    input: Option<gst::Element>,
    output: Option<OutputChain>,
    linked: bool,
    configuring: bool,
    running: bool,
    devices: Vec<(CameraDevice, gst::Device)>,
    preferred: Option<String>,
}

impl GstCaptureBackend {
    pub fn new() -> BackendResult<Self> {
        gst::init().map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        Ok(Self {
            pipeline: gst::Pipeline::with_name("camera-capture"),
            preset: CapturePreset::default(),
            staged: Staged::default(),
            input: None,
            output: None,
            linked: false,
            configuring: false,
            running: false,
            devices: Vec::new(),
            preferred: None,
        })
    }

    /// Prefer the device with this path over the first one found
    pub fn with_device(mut self, path: Option<String>) -> Self {
        self.preferred = path;
        self
    }

    /// Enumerate video sources and remember them for [`CaptureBackend::open_input`]
    pub fn refresh_devices(&mut self) -> Vec<CameraDevice> {
        self.devices = monitor_video_sources();
        self.devices.iter().map(|(device, _)| device.clone()).collect()
    }

    /// Whether input and output are linked in the pipeline
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    fn build_output(&self, output: FrameOutput) -> BackendResult<OutputChain> {
        let convert = gst::ElementFactory::make("videoconvert")
            .name("capture-convert")
            .property("n-threads", pipeline::videoconvert_threads())
            .build()
            .map_err(|e| BackendError::InitializationFailed(format!("videoconvert: {}", e)))?;

        let caps = parse_caps(&self.preset.caps_string())?;
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .name("capture-caps")
            .property("caps", caps)
            .build()
            .map_err(|e| BackendError::InitializationFailed(format!("capsfilter: {}", e)))?;

        let appsink = gst::ElementFactory::make("appsink")
            .name("capture-sink")
            .build()
            .map_err(|e| BackendError::InitializationFailed(format!("appsink: {}", e)))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| {
                BackendError::InitializationFailed("Failed to cast appsink".to_string())
            })?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("sync", false);
        appsink.set_property("max-buffers", pipeline::MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let output = Mutex::new(output);
        let mut first_pts: Option<gst::ClockTime> = None;
        let frame_duration = self.preset.framerate.frame_duration();

        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let frame_num = FRAME_COUNTER.fetch_add(1, Ordering::Relaxed);
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;

                    let Some(buffer) = sample.buffer_owned() else {
                        if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                            error!(frame = frame_num, "No buffer in sample");
                        }
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    if buffer.flags().contains(gst::BufferFlags::CORRUPTED) {
                        if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                            warn!(frame = frame_num, "Buffer marked as corrupted, skipping frame");
                        }
                        return Ok(gst::FlowSuccess::Ok);
                    }

                    let Some(video_info) = sample.caps().and_then(|c| VideoInfo::from_caps(c).ok())
                    else {
                        if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                            error!(frame = frame_num, "Failed to get video info");
                        }
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    // Rebase so the first delivered frame is at zero
                    let pts = match buffer.pts() {
                        Some(pts) => {
                            let first = *first_pts.get_or_insert(pts);
                            Duration::from_nanos(pts.saturating_sub(first).nseconds())
                        }
                        None => frame_duration * frame_num as u32,
                    };

                    let Ok(mapped) = buffer.into_mapped_buffer_readable() else {
                        error!(frame = frame_num, "Failed to map buffer");
                        return Ok(gst::FlowSuccess::Ok);
                    };

                    let frame = RawFrame {
                        width: video_info.width(),
                        height: video_info.height(),
                        stride_y: video_info.stride()[0] as u32,
                        stride_uv: video_info.stride().get(1).copied().unwrap_or(0) as u32,
                        offset_uv: video_info.offset().get(1).copied().unwrap_or(0),
                        pts,
                        data: FrameData::from_mapped_buffer(mapped),
                    };

                    if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                        debug!(
                            frame = frame_num,
                            width = frame.width,
                            height = frame.height,
                            stride_y = frame.stride_y,
                            pts_ms = frame.pts.as_millis() as u64,
                            "Captured frame"
                        );
                    }

                    output.lock().unwrap().deliver(frame);
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(OutputChain {
            convert,
            capsfilter,
            appsink,
        })
    }

    /// Link input and output once both are committed
    fn link(&mut self) -> BackendResult<()> {
        let (Some(source), Some(output)) = (&self.input, &self.output) else {
            return Ok(());
        };
        if self.linked {
            return Ok(());
        }
        gst::Element::link_many([
            source,
            &output.convert,
            &output.capsfilter,
            output.appsink.upcast_ref(),
        ])
        .map_err(|e| BackendError::FormatNotSupported(format!("Failed to link capture: {}", e)))?;
        self.linked = true;
        debug!("Capture pipeline linked");
        Ok(())
    }
}

impl CaptureBackend for GstCaptureBackend {
    type Input = GstInput;

    fn default_video_device(&self) -> Option<CameraDevice> {
        let devices = if self.devices.is_empty() {
            monitor_video_sources()
        } else {
            self.devices.clone()
        };
        if let Some(path) = &self.preferred {
            if let Some((device, _)) = devices.iter().find(|(d, _)| &d.path == path) {
                return Some(device.clone());
            }
            return Some(CameraDevice {
                name: path.clone(),
                path: path.clone(),
                device_class: "Video/Source".to_string(),
            });
        }
        match devices.into_iter().next() {
            Some((device, _)) => Some(device),
            None if gst::ElementFactory::find("pipewiresrc").is_some() => {
                info!("No device reported, using PipeWire auto-selection");
                Some(CameraDevice::pipewire_default())
            }
            None => None,
        }
    }

    fn open_input(&mut self, device: &CameraDevice) -> BackendResult<GstInput> {
        if self.devices.is_empty() {
            self.devices = monitor_video_sources();
        }

        let known = self
            .devices
            .iter()
            .find(|(known, _)| known.path == device.path && !device.path.is_empty());
        let source = match known {
            Some((_, gst_device)) => gst_device
                .create_element(Some("camera-source"))
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?,
            None => source_for_path(&device.path)?,
        };

        info!(device = %device.name, source = %source.name(), "Opened camera input");
        Ok(GstInput {
            device: device.clone(),
            source,
        })
    }

    fn begin_configuration(&mut self) {
        if self.configuring {
            warn!("Configuration already open");
        }
        self.configuring = true;
    }

    fn set_preset(&mut self, preset: &CapturePreset) -> BackendResult<()> {
        // 4:2:0 chroma covers 2x2 luma blocks
        if preset.width == 0 || preset.height == 0 || preset.width % 2 != 0 || preset.height % 2 != 0
        {
            return Err(BackendError::FormatNotSupported(format!(
                "NV12 capture needs even dimensions, got {}x{}",
                preset.width, preset.height
            )));
        }
        self.staged.preset = Some(preset.clone());
        Ok(())
    }

    fn can_add_input(&self, _input: &GstInput) -> bool {
        self.configuring && self.input.is_none() && self.staged.input.is_none()
    }

    fn add_input(&mut self, input: GstInput) {
        self.staged.input = Some(input);
    }

    fn can_add_output(&self) -> bool {
        self.configuring && self.output.is_none() && self.staged.output.is_none()
    }

    fn add_output(&mut self, output: FrameOutput) {
        self.staged.output = Some(output);
    }

    fn commit_configuration(&mut self) {
        self.configuring = false;
        let staged = std::mem::take(&mut self.staged);

        if let Some(preset) = staged.preset {
            if let Some(output) = &self.output
                && let Ok(caps) = parse_caps(&preset.caps_string())
            {
                output.capsfilter.set_property("caps", caps);
            }
            self.preset = preset;
        }

        if let Some(input) = staged.input {
            match self.pipeline.add(&input.source) {
                Ok(()) => self.input = Some(input.source),
                Err(e) => error!(error = %e, "Failed to add camera source"),
            }
        }

        if let Some(output) = staged.output {
            let added = self.build_output(output).and_then(|chain| {
                self.pipeline
                    .add_many([
                        &chain.convert,
                        &chain.capsfilter,
                        chain.appsink.upcast_ref(),
                    ])
                    .map_err(|e| BackendError::Other(e.to_string()))?;
                Ok(chain)
            });
            match added {
                Ok(chain) => self.output = Some(chain),
                Err(e) => error!(error = %e, "Failed to add frame output"),
            }
        }

        if let Err(e) = self.link() {
            error!(error = %e, "Committed configuration cannot be linked");
        }
        debug!(
            input = self.input.is_some(),
            output = self.output.is_some(),
            linked = self.linked,
            "Capture configuration committed"
        );
    }

    fn start_running(&mut self) -> BackendResult<()> {
        if !self.linked {
            warn!("Capture pipeline has no linked input and output, running idle");
            self.running = true;
            return Ok(());
        }

        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to start pipeline: {}", e))
        })?;

        let (result, state, pending) = self.pipeline.state(gst::ClockTime::from_seconds(
            timing::START_TIMEOUT_SECS,
        ));
        debug!(result = ?result, state = ?state, pending = ?pending, "Pipeline state");
        if state != gst::State::Playing {
            warn!("Pipeline is not in PLAYING state");
        }

        self.running = true;
        info!("Camera capture running");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for GstCaptureBackend {
    fn drop(&mut self) {
        if let Some(output) = &self.output {
            output
                .appsink
                .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        }
        let _ = self.pipeline.set_state(gst::State::Null);
        debug!("Capture pipeline stopped");
    }
}

fn parse_caps(caps: &str) -> BackendResult<gst::Caps> {
    caps.parse::<gst::Caps>()
        .map_err(|e| BackendError::FormatNotSupported(format!("{}: {}", caps, e)))
}

/// Enumerate video sources through the GStreamer device monitor
fn monitor_video_sources() -> Vec<(CameraDevice, gst::Device)> {
    if gst::init().is_err() {
        warn!("GStreamer init failed");
        return Vec::new();
    }

    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Video/Source"), None);
    if let Err(e) = monitor.start() {
        debug!(error = %e, "Device monitor failed to start");
        return Vec::new();
    }

    let devices: Vec<(CameraDevice, gst::Device)> = monitor
        .devices()
        .into_iter()
        .filter(|device| device.device_class().contains("Video/Source"))
        .enumerate()
        .map(|(index, device)| {
            let camera = CameraDevice {
                name: device.display_name().to_string(),
                path: device_path(&device).unwrap_or_else(|| format!("gst-device-{}", index)),
                device_class: device.device_class().to_string(),
            };
            (camera, device)
        })
        .collect();
    monitor.stop();

    debug!(count = devices.len(), "Found video sources");
    devices
}

/// Stable path for a monitored device
fn device_path(device: &gst::Device) -> Option<String> {
    let props = device.properties()?;
    if let Ok(serial) = props.get::<String>("object.serial") {
        return Some(format!("pipewire-serial-{}", serial));
    }
    if let Ok(serial) = props.get::<u64>("object.serial") {
        return Some(format!("pipewire-serial-{}", serial));
    }
    ["api.v4l2.path", "device.path"]
        .iter()
        .find_map(|key| props.get::<String>(*key).ok())
}

/// Source element for a device path that the monitor did not report
fn source_for_path(path: &str) -> BackendResult<gst::Element> {
    let builder = if path.is_empty() {
        gst::ElementFactory::make("pipewiresrc")
    } else if let Some(serial) = path.strip_prefix("pipewire-serial-") {
        gst::ElementFactory::make("pipewiresrc").property_from_str("target-object", serial)
    } else if path.starts_with("/dev/video") {
        gst::ElementFactory::make("v4l2src").property("device", path)
    } else {
        return Err(BackendError::DeviceNotFound(path.to_string()));
    };

    builder
        .name("camera-source")
        .build()
        .map_err(|e| BackendError::InitializationFailed(format!("{}: {}", path, e)))
}
