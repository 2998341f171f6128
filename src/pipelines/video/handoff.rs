// SPDX-License-Identifier: GPL-3.0-only

//! Bitstream extraction and ownership handoff
//!
//! A completed encode is turned into an [`EncodedUnit`]: a move-only value
//! holding one retained reference to the encoder's output buffer. Dropping
//! the unit (or calling [`EncodedUnit::release`]) releases that reference,
//! so the Rust side cannot release twice or forget to release.
//!
//! When a unit has to cross into foreign code, [`OwnershipRegistry::export`]
//! parks the retained payload in a handle table and only the integer handle
//! crosses the boundary. [`OwnershipRegistry::release`] redeems a handle at
//! most once; unknown or repeated handles are logged and ignored.

use crate::errors::{EncoderError, EncoderResult};
use crate::media::encoders::session::CompressedSample;
use crate::media::formats::avcc::{self, NalUnits, ParameterSets};
use gstreamer::buffer::{MappedBuffer, Readable};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// A retained reference to encoded bytes
///
/// # Safety
///
/// The slice returned by [`bytes`](RetainedPayload::bytes) must keep the same
/// address and contents for as long as the value is alive, including after
/// the value itself has been moved. Exported pointers rely on this.
pub unsafe trait RetainedPayload: Send + 'static {
    fn bytes(&self) -> &[u8];
}

// Mapped memory belongs to the GstMemory, not to the MappedBuffer value.
unsafe impl RetainedPayload for MappedBuffer<Readable> {
    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

// Heap storage does not move with the Vec header.
unsafe impl RetainedPayload for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

/// One encoded access unit with its release obligation
pub struct EncodedUnit {
    sequence: u64,
    pts: Duration,
    keyframe: bool,
    parameter_sets: Option<Arc<ParameterSets>>,
    payload: Box<dyn RetainedPayload>,
}

impl EncodedUnit {
    pub fn new(
        sequence: u64,
        pts: Duration,
        keyframe: bool,
        parameter_sets: Option<Arc<ParameterSets>>,
        payload: Box<dyn RetainedPayload>,
    ) -> Self {
        Self {
            sequence,
            pts,
            keyframe,
            parameter_sets,
            payload,
        }
    }

    /// Submission sequence number of the source frame
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    /// SPS/PPS in effect, attached to key frames
    pub fn parameter_sets(&self) -> Option<&ParameterSets> {
        self.parameter_sets.as_deref()
    }

    /// Length-prefixed NAL units of the access unit
    pub fn data(&self) -> &[u8] {
        self.payload.bytes()
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn nal_units(&self) -> NalUnits<'_> {
        avcc::nal_units(self.data())
    }

    /// Release the retained reference now
    pub fn release(self) {
        trace!(sequence = self.sequence, "Releasing encoded unit");
        drop(self);
    }
}

impl std::fmt::Debug for EncodedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedUnit")
            .field("sequence", &self.sequence)
            .field("pts", &self.pts)
            .field("keyframe", &self.keyframe)
            .field("len", &self.len())
            .finish()
    }
}

/// Opaque handle standing in for a retained payload outside the process
pub type UnitHandle = u64;

/// Raw view of an exported unit
///
/// `data` stays valid until `handle` is released.
#[derive(Debug)]
pub struct ExportedUnit {
    pub data: *const u8,
    pub len: usize,
    pub handle: UnitHandle,
}

/// Registered-handle table for payloads owned by foreign code
pub struct OwnershipRegistry {
    entries: Mutex<HashMap<UnitHandle, Box<dyn RetainedPayload>>>,
    next_handle: AtomicU64,
}

impl OwnershipRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            // 0 is reserved so a null context never names a live unit
            next_handle: AtomicU64::new(1),
        }
    }

    /// Process-wide table used by the C ABI
    pub fn global() -> &'static OwnershipRegistry {
        static GLOBAL: OnceLock<OwnershipRegistry> = OnceLock::new();
        GLOBAL.get_or_init(OwnershipRegistry::new)
    }

    /// Move a unit's payload into the table and hand out its handle
    pub fn export(&self, unit: EncodedUnit) -> ExportedUnit {
        let EncodedUnit {
            sequence, payload, ..
        } = unit;
        let bytes = payload.bytes();
        let (data, len) = (bytes.as_ptr(), bytes.len());
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);

        self.entries.lock().unwrap().insert(handle, payload);
        trace!(sequence, handle, len, "Exported encoded unit");

        ExportedUnit { data, len, handle }
    }

    /// Drop the payload behind `handle`
    ///
    /// Returns false for unknown or already released handles.
    pub fn release(&self, handle: UnitHandle) -> bool {
        let payload = self.entries.lock().unwrap().remove(&handle);
        match payload {
            Some(payload) => {
                drop(payload);
                trace!(handle, "Released exported unit");
                true
            }
            None => {
                warn!(handle, "Release of unknown or already released unit ignored");
                false
            }
        }
    }

    /// Number of exported units not yet released
    pub fn outstanding(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for OwnershipRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OwnershipRegistry {
    fn drop(&mut self) {
        if let Ok(entries) = self.entries.get_mut()
            && !entries.is_empty()
        {
            debug!(
                outstanding = entries.len(),
                "Dropping registry with unreleased units"
            );
        }
    }
}

/// Turns successful completions into encoded units without copying
#[derive(Debug, Default)]
pub struct BitstreamExtractor {
    extracted: AtomicU64,
}

impl BitstreamExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain the sample payload and wrap it as an [`EncodedUnit`]
    pub fn extract(
        &self,
        sequence: u64,
        pts: Duration,
        sample: Box<dyn CompressedSample>,
    ) -> EncoderResult<EncodedUnit> {
        let keyframe = sample.is_keyframe();
        let parameter_sets = sample.parameter_sets();
        let payload = sample.retain_payload()?;

        if payload.bytes().is_empty() {
            return Err(EncoderError::ExtractionFailed(
                "encoded payload is empty".to_string(),
            ));
        }

        self.extracted.fetch_add(1, Ordering::Relaxed);
        Ok(EncodedUnit::new(
            sequence,
            pts,
            keyframe,
            parameter_sets,
            payload,
        ))
    }

    /// Units produced so far
    pub fn extracted(&self) -> u64 {
        self.extracted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Payload double whose strong count shows whether it was released
    pub struct CountedPayload(pub Arc<Vec<u8>>);

    unsafe impl RetainedPayload for CountedPayload {
        fn bytes(&self) -> &[u8] {
            self.0.as_slice()
        }
    }

    /// Sample double carrying a counted payload
    pub struct FakeSample {
        pub ready: bool,
        pub keyframe: bool,
        pub payload: Arc<Vec<u8>>,
    }

    impl CompressedSample for FakeSample {
        fn is_data_ready(&self) -> bool {
            self.ready
        }

        fn is_keyframe(&self) -> bool {
            self.keyframe
        }

        fn retain_payload(self: Box<Self>) -> EncoderResult<Box<dyn RetainedPayload>> {
            Ok(Box::new(CountedPayload(self.payload)))
        }
    }
}
