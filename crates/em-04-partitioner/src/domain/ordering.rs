//! # Sequence Buffer
//!
//! Reorders one origin's events within one partition.
//!
//! Events are released only when their sequence number equals
//! `next_expected`. Later events wait in a bounded buffer until the gap is
//! filled or the owner force-flushes it.

use std::collections::BTreeMap;

use shared_types::DistributedEvent;

/// First sequence number a partitioner assigns.
pub const FIRST_SEQUENCE: u64 = 1;

/// Why an offered event was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// The buffer is at capacity.
    Full,
    /// Another event already waits under the same sequence number.
    DuplicateSequence,
}

/// Result of a forced flush.
#[derive(Debug, Default)]
pub struct Flushed {
    pub events: Vec<DistributedEvent>,
    /// Sequence numbers skipped without ever arriving.
    pub skipped: u64,
}

#[derive(Debug)]
pub struct SequenceBuffer {
    next_expected: u64,
    pending: BTreeMap<u64, DistributedEvent>,
}

impl Default for SequenceBuffer {
    fn default() -> Self {
        Self {
            next_expected: FIRST_SEQUENCE,
            pending: BTreeMap::new(),
        }
    }
}

impl SequenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_waiting(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Offer `event` carrying `sequence`. Returns the events now deliverable,
    /// in order.
    ///
    /// Events older than `next_expected` arrive after their gap was skipped
    /// and are released immediately.
    pub fn offer(
        &mut self,
        sequence: u64,
        event: DistributedEvent,
        capacity: usize,
    ) -> Result<Vec<DistributedEvent>, OfferError> {
        if sequence < self.next_expected {
            return Ok(vec![event]);
        }
        if sequence > self.next_expected {
            if self.pending.contains_key(&sequence) {
                return Err(OfferError::DuplicateSequence);
            }
            if self.pending.len() >= capacity {
                return Err(OfferError::Full);
            }
            self.pending.insert(sequence, event);
            return Ok(Vec::new());
        }

        let mut ready = vec![event];
        self.next_expected += 1;
        while let Some(next) = self.pending.remove(&self.next_expected) {
            ready.push(next);
            self.next_expected += 1;
        }
        Ok(ready)
    }

    /// Release every buffered event in sequence order and move
    /// `next_expected` past the highest one.
    pub fn force_flush(&mut self) -> Flushed {
        let Some(&highest) = self.pending.keys().next_back() else {
            return Flushed::default();
        };
        let span = highest + 1 - self.next_expected;
        let pending = std::mem::take(&mut self.pending);
        let skipped = span - pending.len() as u64;
        self.next_expected = highest + 1;

        Flushed {
            events: pending.into_values().collect(),
            skipped,
        }
    }
}
