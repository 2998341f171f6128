// SPDX-License-Identifier: GPL-3.0-only

//! Restores submission order for encoder completions
//!
//! Completions are keyed by the sequence number assigned at submission.
//! A backend that already completes in order passes straight through.

use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Outcome slot for one sequence number
enum Slot<T> {
    Completed(T),
    Abandoned,
}

/// Reorders items by submission sequence number
pub struct Resequencer<T> {
    next: u64,
    pending: BTreeMap<u64, Slot<T>>,
    max_pending: usize,
}

impl<T> Resequencer<T> {
    pub fn new(max_pending: usize) -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Sequence number the next released item must carry
    pub fn next_sequence(&self) -> u64 {
        self.next
    }

    /// Items waiting behind a missing sequence number
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Accept a completion; returns every item now releasable, in order
    pub fn push(&mut self, sequence: u64, item: T) -> Vec<(u64, T)> {
        self.insert(sequence, Slot::Completed(item))
    }

    /// Mark a sequence number that will never complete
    pub fn abandon(&mut self, sequence: u64) -> Vec<(u64, T)> {
        self.insert(sequence, Slot::Abandoned)
    }

    fn insert(&mut self, sequence: u64, slot: Slot<T>) -> Vec<(u64, T)> {
        if sequence < self.next || self.pending.contains_key(&sequence) {
            warn!(
                sequence,
                next = self.next,
                "Discarding late or duplicate completion"
            );
            return Vec::new();
        }

        if sequence != self.next {
            debug!(sequence, next = self.next, "Completion arrived out of order");
        }
        self.pending.insert(sequence, slot);

        let mut ready = Vec::new();
        self.drain_in_order(&mut ready);

        // A sequence number that never completes must not hold the stream forever
        while self.pending.len() > self.max_pending {
            if let Some(&oldest) = self.pending.keys().next() {
                warn!(
                    missing_from = self.next,
                    resume_at = oldest,
                    "Skipping completions that never arrived"
                );
                self.next = oldest;
            }
            self.drain_in_order(&mut ready);
        }

        ready
    }

    fn drain_in_order(&mut self, ready: &mut Vec<(u64, T)>) {
        while let Some(slot) = self.pending.remove(&self.next) {
            if let Slot::Completed(item) = slot {
                ready.push((self.next, item));
            }
            self.next += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequences<T>(items: Vec<(u64, T)>) -> Vec<u64> {
        items.into_iter().map(|(seq, _)| seq).collect()
    }

    #[test]
    fn test_in_order_passes_through() {
        let mut reseq = Resequencer::new(4);
        assert_eq!(sequences(reseq.push(0, 'a')), vec![0]);
        assert_eq!(sequences(reseq.push(1, 'b')), vec![1]);
        assert_eq!(reseq.pending(), 0);
    }

    #[test]
    fn test_reordered_completions_are_released_in_order() {
        let mut reseq = Resequencer::new(4);
        assert!(reseq.push(2, 'c').is_empty());
        assert!(reseq.push(1, 'b').is_empty());
        assert_eq!(reseq.push(0, 'a'), vec![(0, 'a'), (1, 'b'), (2, 'c')]);
    }

    #[test]
    fn test_abandoned_sequence_does_not_block() {
        let mut reseq = Resequencer::new(4);
        assert_eq!(sequences(reseq.push(0, ())), vec![0]);
        assert!(reseq.push(2, ()).is_empty());
        assert_eq!(sequences(reseq.abandon(1)), vec![2]);
        assert_eq!(reseq.next_sequence(), 3);
    }

    #[test]
    fn test_late_and_duplicate_are_discarded() {
        let mut reseq = Resequencer::new(4);
        reseq.push(0, 1);
        assert!(reseq.push(0, 2).is_empty());
        reseq.push(2, 3);
        assert!(reseq.push(2, 4).is_empty());
        assert_eq!(reseq.pending(), 1);
    }

    #[test]
    fn test_stuck_gap_is_skipped() {
        let mut reseq = Resequencer::new(2);
        assert!(reseq.push(1, 'b').is_empty());
        assert!(reseq.push(2, 'c').is_empty());
        // third pending item exceeds the limit; sequence 0 is given up
        assert_eq!(sequences(reseq.push(3, 'd')), vec![1, 2, 3]);
        assert!(reseq.push(0, 'a').is_empty());
    }
}
