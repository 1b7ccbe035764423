//! Per-stream retry delays for failed difference fetches.

use crate::config::BackoffConfig;
use chatsync_protocol::StreamId;
use std::collections::HashMap;
use tokio::time::Instant;

#[derive(Debug)]
struct BackoffEntry {
    multiplier: u32,
    next_attempt_at: Option<Instant>,
}

/// Capped exponential retry state, keyed per stream.
///
/// Each consecutive failure doubles a stream's delay multiplier up to the
/// configured cap; the first success clears the stream entirely. Keying per
/// stream means a struggling channel never throttles the global stream or
/// any other channel.
#[derive(Debug)]
pub struct BackoffScheduler {
    config: BackoffConfig,
    entries: HashMap<StreamId, BackoffEntry>,
}

impl BackoffScheduler {
    /// Creates a scheduler.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Records a failure and arms the stream's retry timer.
    ///
    /// After `k` consecutive failures the armed delay is
    /// `base * min(2^k, cap_factor)`.
    pub fn schedule_retry(&mut self, stream: StreamId, now: Instant) -> Instant {
        let entry = self.entries.entry(stream).or_insert(BackoffEntry {
            multiplier: 1,
            next_attempt_at: None,
        });
        entry.multiplier = entry
            .multiplier
            .saturating_mul(2)
            .min(self.config.cap_factor);
        let at = now + self.config.base * entry.multiplier;
        entry.next_attempt_at = Some(at);
        at
    }

    /// Records a success: resets the stream's delay and cancels its timer.
    pub fn on_success(&mut self, stream: StreamId) {
        self.entries.remove(&stream);
    }

    /// Drops all state for an evicted stream.
    pub fn evict(&mut self, stream: StreamId) {
        self.entries.remove(&stream);
    }

    /// Drains the streams whose retry timers have fired.
    ///
    /// Fired timers are disarmed; the delay multiplier is kept so the next
    /// failure keeps climbing toward the cap.
    pub fn take_due(&mut self, now: Instant) -> Vec<StreamId> {
        let mut due = Vec::new();
        for (stream, entry) in &mut self.entries {
            if entry.next_attempt_at.is_some_and(|at| at <= now) {
                entry.next_attempt_at = None;
                due.push(*stream);
            }
        }
        due
    }

    /// The earliest armed retry timer across all streams.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|entry| entry.next_attempt_at)
            .min()
    }

    /// Current delay multiplier for a stream (1 when untracked).
    pub fn multiplier(&self, stream: StreamId) -> u32 {
        self.entries
            .get(&stream)
            .map(|entry| entry.multiplier)
            .unwrap_or(1)
    }

    /// True when the stream has an armed retry timer.
    pub fn is_armed(&self, stream: StreamId) -> bool {
        self.entries
            .get(&stream)
            .is_some_and(|entry| entry.next_attempt_at.is_some())
    }
}
