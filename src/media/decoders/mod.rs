// SPDX-License-Identifier: GPL-3.0-only

//! Receiver-side decoder utilities
//!
//! The encoded stream carries no in-band setup a decoder can start from, so
//! receivers are bootstrapped from a fixed pair of parameter sets.

pub mod bootstrap;
mod hardware;

pub use bootstrap::{BOOTSTRAP_PPS, BOOTSTRAP_SPS, FormatDescription};
pub use hardware::detect_hw_decoders;
