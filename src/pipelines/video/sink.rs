// SPDX-License-Identifier: GPL-3.0-only

//! Consumers of encoded units

use super::handoff::EncodedUnit;
use crate::constants::sink::CHANNEL_BUFFER_SIZE;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Kind of stream announced to the transport
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Audio = 0,
    Video = 1,
}

/// The external transport that takes encoded units
///
/// Every unit passed to [`deliver`](Sink::deliver) carries one release
/// obligation; the sink discharges it by dropping the unit, by calling
/// [`EncodedUnit::release`], or by exporting it to foreign code.
pub trait Sink: Send + Sync + 'static {
    /// Announce the stream; called once when the pipeline is constructed
    fn start_stream(&self, stream_type: StreamType);

    fn deliver(&self, unit: EncodedUnit);
}

/// Bounded channel into an async consumer
///
/// Never blocks the completion path: when the consumer falls behind the
/// unit is dropped, which releases it.
pub struct ChannelSink {
    sender: mpsc::Sender<EncodedUnit>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EncodedUnit>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// Units discarded because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new(CHANNEL_BUFFER_SIZE).0
    }
}

impl Sink for ChannelSink {
    fn start_stream(&self, stream_type: StreamType) {
        info!(?stream_type, "Stream started on channel sink");
    }

    fn deliver(&self, unit: EncodedUnit) {
        match self.sender.try_send(unit) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(unit)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    sequence = unit.sequence(),
                    dropped, "Sink channel full, dropping encoded unit"
                );
            }
            Err(mpsc::error::TrySendError::Closed(unit)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sequence = unit.sequence(),
                    "Sink channel closed, dropping encoded unit"
                );
            }
        }
    }
}
