// SPDX-License-Identifier: MPL-2.0

//! Encoded video delivery
//!
//! Completions may arrive out of order; the [`resequencer`] restores
//! submission order, the [`handoff`] module turns each sample into an
//! [`EncodedUnit`] that owns its payload, and a [`sink`] consumes it.

pub mod handoff;
pub mod resequencer;
pub mod sink;

pub use handoff::{EncodedUnit, OwnershipRegistry};
pub use resequencer::Resequencer;
pub use sink::{ChannelSink, Sink, StreamType};
