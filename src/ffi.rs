// SPDX-License-Identifier: GPL-3.0-only

//! C ABI for an external transport
//!
//! The transport receives each encoded unit as `(data, len, context,
//! on_release)`. `context` is a handle into the process-wide
//! [`OwnershipRegistry`], never a pointer to Rust state; `data` stays valid
//! until `on_release(context)` is called. Releasing an unknown or already
//! released context is logged and ignored.
//!
//! A C host drives the whole pipeline with [`rtp_camera_start`] and
//! [`rtp_camera_stop`].

use crate::backends::authorization::PortalAccess;
use crate::backends::camera::{CaptureSession, CapturePreset, GstCaptureBackend};
use crate::config::Config;
use crate::errors::{AppError, AppResult, CaptureError};
use crate::media::encoders::gstreamer::GstEncoderBackend;
use crate::pipelines::video::handoff::{EncodedUnit, OwnershipRegistry, UnitHandle};
use crate::pipelines::video::sink::{Sink, StreamType};
use std::ffi::c_void;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Release function handed to the transport with every unit
pub type ReleaseCallback = extern "C" fn(context: *mut c_void);

/// Transport entry point for one encoded unit
pub type DeliverCallback = unsafe extern "C" fn(
    data: *const u8,
    len: usize,
    context: *mut c_void,
    on_release: ReleaseCallback,
);

/// Transport entry point announcing a stream
pub type StartStreamCallback = unsafe extern "C" fn(
    enabled: bool,
    stream_type: StreamType,
    handle: *mut c_void,
    flags: u32,
);

/// Sink forwarding units to C function pointers
pub struct ForeignSink {
    deliver: DeliverCallback,
    start_stream: StartStreamCallback,
    // Opaque to Rust; stored as an address so the sink is Send + Sync
    stream_handle: usize,
    flags: u32,
}

impl ForeignSink {
    /// Wrap transport callbacks
    ///
    /// # Safety
    ///
    /// Both callbacks must be callable from any thread for the lifetime of
    /// the sink, and `deliver` must not read `data` after calling
    /// `on_release(context)`.
    pub unsafe fn new(
        deliver: DeliverCallback,
        start_stream: StartStreamCallback,
        stream_handle: *mut c_void,
        flags: u32,
    ) -> Self {
        Self {
            deliver,
            start_stream,
            stream_handle: stream_handle as usize,
            flags,
        }
    }
}

impl Sink for ForeignSink {
    fn start_stream(&self, stream_type: StreamType) {
        info!(?stream_type, flags = self.flags, "Starting foreign stream");
        // SAFETY: upheld by the caller of `ForeignSink::new`
        unsafe {
            (self.start_stream)(
                true,
                stream_type,
                self.stream_handle as *mut c_void,
                self.flags,
            )
        }
    }

    fn deliver(&self, unit: EncodedUnit) {
        let sequence = unit.sequence();
        let exported = OwnershipRegistry::global().export(unit);
        debug!(
            sequence,
            handle = exported.handle,
            len = exported.len,
            "Delivering to transport"
        );
        // SAFETY: `data` points into a payload parked in the registry until
        // the transport releases `handle`
        unsafe {
            (self.deliver)(
                exported.data,
                exported.len,
                handle_to_context(exported.handle),
                rtp_camera_release_unit,
            )
        }
    }
}

fn handle_to_context(handle: UnitHandle) -> *mut c_void {
    handle as usize as *mut c_void
}

fn context_to_handle(context: *mut c_void) -> UnitHandle {
    context as usize as UnitHandle
}

/// Capture session owned by a C host
///
/// The session is declared first so it is torn down before the runtime.
pub struct RtpCameraPipeline {
    session: CaptureSession<GstCaptureBackend, GstEncoderBackend, PortalAccess>,
    _runtime: tokio::runtime::Runtime,
}

impl RtpCameraPipeline {
    /// Configure and start the default camera into `sink` using the saved config
    pub fn start(sink: Arc<dyn Sink>) -> AppResult<Self> {
        gstreamer::init().map_err(|e| CaptureError::Backend(e.to_string()))?;
        let config = Config::load();
        let runtime = tokio::runtime::Runtime::new()?;

        let backend = GstCaptureBackend::new()
            .map_err(CaptureError::from)?
            .with_device(config.device.clone());
        let mut session = CaptureSession::new(backend, GstEncoderBackend, PortalAccess::new(), sink)
            .with_encoder_settings(config.encoder_settings(&CapturePreset::default()));

        runtime.block_on(async {
            session.configure().await?;
            session.start().await?;
            Ok::<(), AppError>(())
        })?;

        Ok(Self {
            session,
            _runtime: runtime,
        })
    }

    pub fn session(&self) -> &CaptureSession<GstCaptureBackend, GstEncoderBackend, PortalAccess> {
        &self.session
    }
}

/// Start capturing from the default camera into the transport callbacks
///
/// `start_stream` is called once before this returns. Returns null when
/// startup fails; the cause is logged.
///
/// # Safety
///
/// Same contract as [`ForeignSink::new`]. A non-null result must be passed
/// to [`rtp_camera_stop`] exactly once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtp_camera_start(
    deliver: DeliverCallback,
    start_stream: StartStreamCallback,
    stream_handle: *mut c_void,
    flags: u32,
) -> *mut RtpCameraPipeline {
    // SAFETY: forwarded from our caller
    let sink = unsafe { ForeignSink::new(deliver, start_stream, stream_handle, flags) };
    match RtpCameraPipeline::start(Arc::new(sink)) {
        Ok(pipeline) => {
            info!(
                encoder = ?pipeline.session().encoder().map(|e| e.name().to_string()),
                "Capture pipeline started for transport"
            );
            Box::into_raw(Box::new(pipeline))
        }
        Err(e) => {
            error!(error = %e, "Failed to start capture pipeline");
            std::ptr::null_mut()
        }
    }
}

/// Stop a pipeline returned by [`rtp_camera_start`]; null is ignored
///
/// Units already delivered stay valid until released.
///
/// # Safety
///
/// `pipeline` must be null or come from [`rtp_camera_start`] and not have
/// been stopped yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtp_camera_stop(pipeline: *mut RtpCameraPipeline) {
    if pipeline.is_null() {
        return;
    }
    // SAFETY: ownership returns from the host exactly once
    let pipeline = unsafe { Box::from_raw(pipeline) };
    info!(
        frames = pipeline.session().router().frames(),
        outstanding = OwnershipRegistry::global().outstanding(),
        "Stopping capture pipeline"
    );
    drop(pipeline);
}

/// Release the unit behind `context`
#[unsafe(no_mangle)]
pub extern "C" fn rtp_camera_release_unit(context: *mut c_void) {
    OwnershipRegistry::global().release(context_to_handle(context));
}

/// Number of delivered units the transport has not released yet
#[unsafe(no_mangle)]
pub extern "C" fn rtp_camera_outstanding_units() -> usize {
    OwnershipRegistry::global().outstanding()
}
