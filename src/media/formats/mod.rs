// SPDX-License-Identifier: MPL-2.0

//! Format utilities
//!
//! Encoded units use AVC framing: NAL units prefixed with 4-byte big-endian
//! lengths, with SPS and PPS carried out of band.

pub mod avcc;

pub use avcc::{AvccError, ParameterSets};
