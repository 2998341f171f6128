// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - Listing cameras and hardware encoders
//! - Streaming the camera through the encoder into a local sink
//! - Printing the decoder bootstrap description

use chrono::Local;
use rtp_camera::backends::authorization::PortalAccess;
use rtp_camera::backends::camera::{
    CaptureBackend, CaptureSession, CapturePreset, GstCaptureBackend, PreviewImage,
};
use rtp_camera::config::Config;
use rtp_camera::constants::format_bitrate;
use rtp_camera::media::decoders::{FormatDescription, detect_hw_decoders};
use rtp_camera::media::encoders::detection::missing_required_elements;
use rtp_camera::media::encoders::gstreamer::GstEncoderBackend;
use rtp_camera::media::encoders::video::enumerate_video_encoders;
use rtp_camera::media::formats::avcc;
use rtp_camera::pipelines::video::handoff::EncodedUnit;
use rtp_camera::pipelines::video::sink::ChannelSink;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// List all available cameras
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    let mut backend = GstCaptureBackend::new()?;
    let cameras = backend.refresh_devices();

    if cameras.is_empty() {
        println!("No cameras found.");
        if let Some(default) = backend.default_video_device() {
            println!("Fallback: {}", default.name);
        }
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        println!("  [{}] {}", index, camera.name);
        println!("      Path: {}", camera.path);
    }
    println!();
    println!("Capture preset: {}", CapturePreset::default());

    Ok(())
}

/// List hardware H.264 encoders in selection order
pub fn list_encoders() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let encoders = enumerate_video_encoders();
    if encoders.is_empty() {
        println!("No hardware H.264 encoder found.");
    } else {
        println!("Hardware H.264 encoders:");
        for encoder in &encoders {
            println!(
                "  {:>3}  {:<14} {}",
                encoder.priority, encoder.element_name, encoder.display_name
            );
        }
    }

    let missing = missing_required_elements();
    if !missing.is_empty() {
        println!();
        println!("Missing pipeline elements: {}", missing.join(", "));
    }

    Ok(())
}

/// Print the decoder bootstrap description
pub fn print_bootstrap() -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let description = FormatDescription::bootstrap()?;
    println!("Format: {}", description);
    println!("avcC:   {}", hex(description.avcc()));
    println!("Caps:   {}", description.caps());

    let decoders = detect_hw_decoders();
    if decoders.is_empty() {
        println!("Hardware decoders: none");
    } else {
        println!("Hardware decoders: {}", decoders.join(", "));
    }

    Ok(())
}

/// Run the capture pipeline into a local channel sink
///
/// `dump` is `Some(None)` when `--dump` is given without a file name.
pub fn stream(
    duration: Option<u64>,
    dump: Option<Option<PathBuf>>,
    snapshot: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;
    let config = Config::load();

    let dump_path = match dump {
        Some(Some(path)) => Some(path),
        Some(None) => {
            let dir = get_default_dump_dir();
            std::fs::create_dir_all(&dir)?;
            let timestamp = Local::now().format("%Y%m%d_%H%M%S");
            Some(dir.join(format!("stream_{}.h264", timestamp)))
        }
        None => None,
    };
    let mut writer = match &dump_path {
        Some(path) => Some(AnnexBWriter::create(path)?),
        None => None,
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (sink, mut units) = ChannelSink::new(config.sink_capacity);
        let sink = Arc::new(sink);

        let backend = GstCaptureBackend::new()?.with_device(config.device.clone());
        let preset = CapturePreset::default();
        let mut session = CaptureSession::new(
            backend,
            GstEncoderBackend,
            PortalAccess::new(),
            sink.clone(),
        )
        .with_encoder_settings(config.encoder_settings(&preset));

        session.configure().await?;
        session.start().await?;

        let mut previews = (config.preview || snapshot.is_some())
            .then(|| session.preview().subscribe());
        let mut last_preview: Option<PreviewImage> = None;

        if let Some(encoder) = session.encoder() {
            println!(
                "Encoder: {} at {}",
                encoder.name(),
                format_bitrate(encoder.settings().bitrate_kbps)
            );
        }
        if let Some(path) = &dump_path {
            println!("Dump: {}", path.display());
        }
        println!("Streaming {}... (press Ctrl+C to stop)", preset);

        let start = Instant::now();
        let limit = duration.map(Duration::from_secs);
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        let mut stats = StreamStats::default();
        let mut last_report = Instant::now();

        loop {
            tokio::select! {
                unit = units.recv() => {
                    let Some(unit) = unit else { break };
                    stats.record(&unit);
                    if let Some(writer) = writer.as_mut() {
                        writer.write_unit(&unit)?;
                    }
                    unit.release();
                }
                _ = ticker.tick() => {
                    if stop_flag.load(Ordering::SeqCst) {
                        println!();
                        println!("Stopping...");
                        break;
                    }
                    if limit.is_some_and(|limit| start.elapsed() >= limit) {
                        break;
                    }
                    if let Some(receiver) = previews.as_mut() {
                        drain_previews(receiver, &mut last_preview, &mut stats);
                    }
                    if last_report.elapsed() >= Duration::from_secs(1) {
                        last_report = Instant::now();
                        let completions = session.encoder().map(|e| e.completions());
                        let kbps = stats.take_kbps();
                        print!(
                            "\r{:>5}s  frames {:>6}  units {:>6}  key {:>4}  {:>8.1} kbps  dropped {}/{}  previews {}  encoder {:?}   ",
                            start.elapsed().as_secs(),
                            session.router().frames(),
                            stats.units,
                            stats.keyframes,
                            kbps,
                            completions.map_or(0, |c| c.dropped()),
                            sink.dropped(),
                            stats.previews,
                            session.encoder_state(),
                        );
                        std::io::stdout().flush()?;
                    }
                }
            }
        }
        println!();

        if let Some(writer) = writer.take() {
            writer.finish()?;
        }
        if let (Some(path), Some(preview)) = (snapshot.as_ref(), last_preview.as_ref()) {
            preview.image.save(path)?;
            println!("Preview snapshot saved: {}", path.display());
        }
        println!(
            "Delivered {} units ({} key frames) from {} frames",
            stats.units,
            stats.keyframes,
            session.router().frames()
        );
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

fn drain_previews(
    receiver: &mut mpsc::Receiver<PreviewImage>,
    last: &mut Option<PreviewImage>,
    stats: &mut StreamStats,
) {
    while let Ok(image) = receiver.try_recv() {
        stats.previews += 1;
        *last = Some(image);
    }
}

#[derive(Default)]
struct StreamStats {
    units: u64,
    keyframes: u64,
    previews: u64,
    window_bytes: u64,
    window_start: Option<Instant>,
}

impl StreamStats {
    fn record(&mut self, unit: &EncodedUnit) {
        self.units += 1;
        if unit.is_keyframe() {
            self.keyframes += 1;
        }
        self.window_bytes += unit.len() as u64;
        self.window_start.get_or_insert_with(Instant::now);
    }

    /// Bitrate since the last call
    fn take_kbps(&mut self) -> f64 {
        let Some(start) = self.window_start.replace(Instant::now()) else {
            return 0.0;
        };
        let secs = start.elapsed().as_secs_f64().max(0.001);
        let kbps = self.window_bytes as f64 * 8.0 / 1000.0 / secs;
        self.window_bytes = 0;
        kbps
    }
}

/// Writes encoded units as an Annex-B elementary stream
struct AnnexBWriter {
    file: BufWriter<File>,
    scratch: Vec<u8>,
    seen_keyframe: bool,
}

impl AnnexBWriter {
    fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            file: BufWriter::new(File::create(path)?),
            scratch: Vec::new(),
            seen_keyframe: false,
        })
    }

    fn write_unit(&mut self, unit: &EncodedUnit) -> Result<(), Box<dyn std::error::Error>> {
        // Decoders cannot start on a delta frame
        if !self.seen_keyframe && !unit.is_keyframe() {
            return Ok(());
        }
        self.seen_keyframe = true;

        self.scratch.clear();
        if unit.is_keyframe()
            && let Some(sets) = unit.parameter_sets()
        {
            self.scratch.extend_from_slice(&sets.to_annex_b());
        }
        avcc::to_annex_b(unit.data(), &mut self.scratch)?;
        self.file.write_all(&self.scratch)?;
        Ok(())
    }

    fn finish(mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn get_default_dump_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("rtp-camera")
}
