//! Reliable, ordered delivery over an unreliable link.
//!
//! Sender side keeps every frame until it is acknowledged and resends it on
//! a fixed timeout. Receiver side acknowledges everything, drops duplicates
//! and releases payloads strictly in sequence order.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{sequence_newer, SequenceNumber};

/// Frames further ahead than this are treated as garbage.
const MAX_REORDER_WINDOW: u16 = 1024;

/// A frame pending acknowledgment.
#[derive(Clone, Debug)]
struct PendingFrame {
    sequence: SequenceNumber,
    payload: Vec<u8>,
    sent_time: Instant,
    resends: u32,
}

/// Frames due for retransmission.
#[derive(Debug, Default)]
pub struct ResendBatch {
    /// `(sequence, payload)` pairs to transmit again.
    pub frames: Vec<(SequenceNumber, Vec<u8>)>,
    /// A frame ran out of resends; the link should be considered dead.
    pub exhausted: bool,
}

/// Per-link reliable channel state.
#[derive(Debug)]
pub struct ReliableChannel {
    /// Frames waiting for acknowledgment.
    pending: Vec<PendingFrame>,
    /// Next outgoing sequence.
    next_sequence: SequenceNumber,
    /// Next incoming sequence to release.
    expected: SequenceNumber,
    /// Early arrivals held until the gap fills.
    reorder: HashMap<SequenceNumber, Vec<u8>>,
    /// Resend timeout.
    resend_timeout: Duration,
    /// Resends before giving up on the link.
    max_resends: u32,
}

impl ReliableChannel {
    /// Creates a channel with the given resend policy.
    #[must_use]
    pub fn new(resend_timeout: Duration, max_resends: u32) -> Self {
        Self {
            pending: Vec::with_capacity(32),
            next_sequence: 0,
            expected: 0,
            reorder: HashMap::new(),
            resend_timeout,
            max_resends,
        }
    }

    /// Queues a payload; the caller transmits it under the returned sequence.
    pub fn send(&mut self, payload: &[u8], now: Instant) -> SequenceNumber {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.pending.push(PendingFrame {
            sequence,
            payload: payload.to_vec(),
            sent_time: now,
            resends: 0,
        });
        sequence
    }

    /// Acknowledges receipt of a frame.
    pub fn acknowledge(&mut self, sequence: SequenceNumber) {
        self.pending.retain(|p| p.sequence != sequence);
    }

    /// Frames sent but not acknowledged yet.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Accepts an incoming frame and returns every payload that is now
    /// deliverable, in order. Duplicates yield nothing.
    pub fn receive(&mut self, sequence: SequenceNumber, payload: Vec<u8>) -> Vec<Vec<u8>> {
        if sequence != self.expected {
            let ahead = sequence.wrapping_sub(self.expected);
            if sequence_newer(sequence, self.expected) && ahead < MAX_REORDER_WINDOW {
                self.reorder.entry(sequence).or_insert(payload);
            }
            return Vec::new();
        }

        let mut ready = vec![payload];
        self.expected = self.expected.wrapping_add(1);
        while let Some(next) = self.reorder.remove(&self.expected) {
            ready.push(next);
            self.expected = self.expected.wrapping_add(1);
        }
        ready
    }

    /// Collects frames whose resend timeout elapsed.
    pub fn resends(&mut self, now: Instant) -> ResendBatch {
        let mut batch = ResendBatch::default();
        for frame in &mut self.pending {
            if now.duration_since(frame.sent_time) > self.resend_timeout {
                frame.sent_time = now;
                frame.resends += 1;
                batch.frames.push((frame.sequence, frame.payload.clone()));
            }
        }
        batch.exhausted = self.pending.iter().any(|p| p.resends > self.max_resends);
        batch
    }
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 30)
    }
}
