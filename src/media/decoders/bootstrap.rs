// SPDX-License-Identifier: GPL-3.0-only

//! Decoder bootstrap from fixed parameter sets
//!
//! A receiving decoder needs the stream's SPS and PPS before the first
//! access unit. The pair below matches the main profile, level 3.1 stream
//! the encoder produces at the capture preset.

use crate::constants::encoder;
use crate::media::formats::avcc::{AvccError, ParameterSets};
use gstreamer as gst;
use std::fmt;

/// Sequence parameter set of the bootstrap stream
pub const BOOTSTRAP_SPS: [u8; 19] = [
    39, 77, 0, 31, 137, 138, 48, 10, 0, 183, 77, 64, 128, 128, 129, 225, 0, 132, 208,
];

/// Picture parameter set of the bootstrap stream
pub const BOOTSTRAP_PPS: [u8; 4] = [40, 238, 60, 128];

/// The fixed bootstrap parameter sets
pub fn bootstrap_parameter_sets() -> Result<ParameterSets, AvccError> {
    ParameterSets::new(BOOTSTRAP_SPS.to_vec(), BOOTSTRAP_PPS.to_vec())
}

/// Opaque decoder format description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    parameter_sets: ParameterSets,
    nal_length_size: usize,
    avcc: Vec<u8>,
}

impl FormatDescription {
    /// Build a description for AVC framed input
    ///
    /// Only 4-byte NAL unit length fields are supported.
    pub fn from_parameter_sets(
        parameter_sets: &ParameterSets,
        nal_length_size: usize,
    ) -> Result<Self, AvccError> {
        if nal_length_size != encoder::NAL_LENGTH_SIZE {
            return Err(AvccError::UnsupportedLengthSize(nal_length_size));
        }
        let avcc = parameter_sets.to_avcc(nal_length_size)?;
        Ok(Self {
            parameter_sets: parameter_sets.clone(),
            nal_length_size,
            avcc,
        })
    }

    /// Description built from [`BOOTSTRAP_SPS`] and [`BOOTSTRAP_PPS`]
    pub fn bootstrap() -> Result<Self, AvccError> {
        Self::from_parameter_sets(&bootstrap_parameter_sets()?, encoder::NAL_LENGTH_SIZE)
    }

    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.parameter_sets
    }

    pub fn nal_length_size(&self) -> usize {
        self.nal_length_size
    }

    /// The `avcC` decoder configuration record
    pub fn avcc(&self) -> &[u8] {
        &self.avcc
    }

    /// RFC 6381 codec string, e.g. `avc1.4d001f`
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.parameter_sets.profile_idc(),
            self.parameter_sets.profile_compatibility(),
            self.parameter_sets.level_idc()
        )
    }

    /// Caps a GStreamer H.264 decoder accepts for this stream
    pub fn caps(&self) -> gst::Caps {
        gst::Caps::builder("video/x-h264")
            .field("stream-format", "avc")
            .field("alignment", "au")
            .field("codec_data", gst::Buffer::from_slice(self.avcc.clone()))
            .build()
    }
}

impl fmt::Display for FormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (profile {}, level {}.{}, {}-byte NAL lengths)",
            self.codec_string(),
            self.parameter_sets.profile_idc(),
            self.parameter_sets.level_idc() / 10,
            self.parameter_sets.level_idc() % 10,
            self.nal_length_size
        )
    }
}
