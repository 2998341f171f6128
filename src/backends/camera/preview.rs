// SPDX-License-Identifier: GPL-3.0-only

//! Best-effort preview fan-out
//!
//! The tap holds a single one-slot channel. A frame is converted and sent
//! only when a consumer is subscribed and has taken the previous image;
//! otherwise it is skipped. Capture is never blocked.

use super::types::RawFrame;
use crate::constants::timing;
use crate::media::nv12_converter::convert_nv12_to_rgba;
use image::RgbaImage;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A displayable preview image
#[derive(Debug, Clone)]
pub struct PreviewImage {
    pub pts: Duration,
    pub image: RgbaImage,
}

/// Single-slot lossy distribution point for preview images
#[derive(Default)]
pub struct PreviewTap {
    consumer: Mutex<Option<mpsc::Sender<PreviewImage>>>,
    offered: AtomicU64,
    delivered: AtomicU64,
}

impl PreviewTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the active consumer, replacing any previous one
    pub fn subscribe(&self) -> mpsc::Receiver<PreviewImage> {
        let (sender, receiver) = mpsc::channel(1);
        if self.consumer.lock().unwrap().replace(sender).is_some() {
            debug!("Preview consumer replaced");
        }
        receiver
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Offer a frame; never blocks
    pub fn offer(&self, frame: &RawFrame) {
        let offered = self.offered.fetch_add(1, Ordering::Relaxed);

        let sender = {
            let mut consumer = self.consumer.lock().unwrap();
            match consumer.as_ref() {
                Some(sender) if sender.is_closed() => {
                    debug!("Preview consumer went away");
                    *consumer = None;
                    return;
                }
                // Previous image not taken yet
                Some(sender) if sender.capacity() == 0 => return,
                Some(sender) => sender.clone(),
                None => return,
            }
        };

        let image = match convert_nv12_to_rgba(frame) {
            Ok(image) => image,
            Err(e) => {
                if offered % timing::FRAME_LOG_INTERVAL == 0 {
                    debug!(error = %e, "Preview conversion failed");
                }
                return;
            }
        };

        match sender.try_send(PreviewImage {
            pts: frame.pts,
            image,
        }) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => trace!(error = %e, "Preview image skipped"),
        }
    }

    /// Frames offered and images actually handed to a consumer
    pub fn stats(&self) -> (u64, u64) {
        (
            self.offered.load(Ordering::Relaxed),
            self.delivered.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(ms: u64) -> RawFrame {
        RawFrame::nv12_packed(4, 2, Duration::from_millis(ms), Arc::from(vec![128u8; 12]))
    }

    #[test]
    fn test_no_consumer_drops_silently() {
        let tap = PreviewTap::new();
        tap.offer(&frame(0));
        assert_eq!(tap.stats(), (1, 0));
        assert!(!tap.has_consumer());
    }

    #[test]
    fn test_unconsumed_image_is_not_queued() {
        let tap = PreviewTap::new();
        let mut receiver = tap.subscribe();

        tap.offer(&frame(0));
        tap.offer(&frame(33));
        tap.offer(&frame(66));

        let first = receiver.try_recv().unwrap();
        assert_eq!(first.pts, Duration::ZERO);
        assert_eq!(first.image.dimensions(), (4, 2));
        assert!(receiver.try_recv().is_err());
        assert_eq!(tap.stats(), (3, 1));

        tap.offer(&frame(99));
        assert_eq!(receiver.try_recv().unwrap().pts, Duration::from_millis(99));
    }

    #[test]
    fn test_closed_consumer_is_cleared() {
        let tap = PreviewTap::new();
        drop(tap.subscribe());
        tap.offer(&frame(0));
        assert!(!tap.has_consumer());
    }

    #[test]
    fn test_new_subscriber_replaces_old() {
        let tap = PreviewTap::new();
        let mut old = tap.subscribe();
        let mut new = tap.subscribe();

        tap.offer(&frame(0));
        assert!(old.try_recv().is_err());
        assert!(new.try_recv().is_ok());
    }
}
