//! Envelope-order sequencing with a bounded wait.

use chatsync_protocol::Envelope;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// Where the sequencer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
    /// Envelopes are flowing in order.
    Idle,
    /// At least one envelope is buffered waiting for its predecessor.
    AwaitingPredecessor,
}

/// Outcome of admitting one envelope.
#[derive(Debug)]
pub enum Admit {
    /// These envelopes are next in order; unpack and dispatch them.
    Dispatch(Vec<Envelope>),
    /// The envelope arrived early and was buffered.
    Buffered,
    /// At or below the expected order; dropped.
    Duplicate,
    /// The pending buffer is full; the caller should abandon it and force a
    /// global resync.
    Overflow,
}

/// Reorders whole envelopes by their `global_order` counter.
///
/// An envelope at exactly the expected order dispatches immediately,
/// together with any buffered successors that now form a contiguous chain.
/// An early envelope is buffered under a bounded wait; if the wait expires
/// before the chain closes, the buffer is abandoned and the caller falls
/// back to a global difference fetch.
#[derive(Debug)]
pub struct EnvelopeSequencer {
    expected: Option<u64>,
    pending: BTreeMap<u64, Envelope>,
    wait_deadline: Option<Instant>,
    wait: Duration,
    max_pending: usize,
}

impl EnvelopeSequencer {
    /// Creates an uninitialized sequencer; the first envelope seen sets the
    /// expected order.
    pub fn new(wait: Duration, max_pending: usize) -> Self {
        Self {
            expected: None,
            pending: BTreeMap::new(),
            wait_deadline: None,
            wait,
            max_pending,
        }
    }

    /// Admits one envelope.
    pub fn accept(&mut self, envelope: Envelope, now: Instant) -> Admit {
        let order = envelope.global_order;
        let expected = match self.expected {
            None => {
                self.expected = Some(order + 1);
                return Admit::Dispatch(vec![envelope]);
            }
            Some(expected) => expected,
        };

        if order < expected {
            return Admit::Duplicate;
        }

        if order == expected {
            let mut chain = vec![envelope];
            let mut next = expected + 1;
            while let Some(successor) = self.pending.remove(&next) {
                chain.push(successor);
                next += 1;
            }
            self.expected = Some(next);
            if self.pending.is_empty() {
                self.wait_deadline = None;
            } else {
                // A gap still stands in front of the remaining buffer; give
                // it a fresh wait.
                self.wait_deadline = Some(now + self.wait);
            }
            return Admit::Dispatch(chain);
        }

        // Early envelope.
        if self.pending.contains_key(&order) {
            return Admit::Duplicate;
        }
        if self.pending.len() >= self.max_pending {
            return Admit::Overflow;
        }
        if self.wait_deadline.is_none() {
            self.wait_deadline = Some(now + self.wait);
        }
        self.pending.insert(order, envelope);
        Admit::Buffered
    }

    /// Reports whether the bounded wait has expired. A fired wait is
    /// disarmed; the caller decides what to do with the buffer.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.wait_deadline {
            Some(deadline) if now >= deadline => {
                self.wait_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Re-baselines after a global catch-up and drains whatever buffered
    /// chain continues from the new order, for dispatch by the caller.
    ///
    /// Buffered envelopes at or below the baseline are covered by the
    /// catch-up and are discarded.
    pub fn adopt(&mut self, order: u64, now: Instant) -> Vec<Envelope> {
        self.pending.retain(|&pending_order, _| pending_order > order);

        let mut chain = Vec::new();
        let mut next = order + 1;
        while let Some(envelope) = self.pending.remove(&next) {
            chain.push(envelope);
            next += 1;
        }
        self.expected = Some(next);
        self.wait_deadline = if self.pending.is_empty() {
            None
        } else {
            Some(now + self.wait)
        };
        chain
    }

    /// Abandons the pending buffer.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.wait_deadline = None;
    }

    /// Returns the sequencer to its uninitialized state.
    pub fn reset(&mut self) {
        self.expected = None;
        self.clear_pending();
    }

    /// Current phase.
    pub fn phase(&self) -> SequencerPhase {
        if self.pending.is_empty() {
            SequencerPhase::Idle
        } else {
            SequencerPhase::AwaitingPredecessor
        }
    }

    /// The next expected envelope order, once initialized.
    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    /// Number of buffered envelopes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The bounded wait's deadline, while armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.wait_deadline
    }
}
