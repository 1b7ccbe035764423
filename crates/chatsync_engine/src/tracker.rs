//! Per-stream gap detection.

use chatsync_protocol::Position;
use std::time::Duration;
use tokio::time::Instant;

/// What to do with an observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Deliver. When a gap just closed, the caller drains its buffer for
    /// this stream in increasing position order, current event included.
    Apply,
    /// Hold the event until the gap resolves.
    Buffer,
    /// Duplicate or stale; drop without applying.
    AlreadyApplied,
}

/// Gap detector for one stream: pure counter arithmetic, no I/O.
///
/// `confirmed` is the highest position known to be contiguously applied;
/// `high` is the highest position observed; `accumulated` sums the weights
/// of observed-but-unconfirmed events. The window is closed exactly when
/// `high == confirmed + accumulated`.
///
/// Invariants: `confirmed <= high`; `confirmed` never decreases; while
/// `requesting` is set, no event is applied, only buffered.
#[derive(Debug)]
pub struct PositionTracker {
    confirmed: Position,
    high: Position,
    accumulated: u64,
    initialized: bool,
    requesting: bool,
    gap_since: Option<Instant>,
}

impl PositionTracker {
    /// Creates an uninitialized tracker; the first observed event (or an
    /// adopted baseline) initializes it.
    pub fn new() -> Self {
        Self {
            confirmed: 0,
            high: 0,
            accumulated: 0,
            initialized: false,
            requesting: false,
            gap_since: None,
        }
    }

    /// Creates a tracker with a known baseline.
    pub fn with_baseline(confirmed: Position) -> Self {
        let mut tracker = Self::new();
        tracker.adopt(confirmed);
        tracker
    }

    /// Observes an event and decides its fate.
    pub fn observe(&mut self, position: Position, weight: u32, now: Instant) -> Decision {
        if !self.initialized {
            self.adopt(position);
            return Decision::Apply;
        }
        if self.requesting {
            return Decision::Buffer;
        }
        if weight == 0 {
            // Position-only probe: informational, never blocks delivery and
            // never opens or closes a window.
            return Decision::Apply;
        }
        if position <= self.confirmed {
            return Decision::AlreadyApplied;
        }

        self.high = self.high.max(position);
        self.accumulated = self.accumulated.saturating_add(u64::from(weight));
        let reach = self.confirmed.saturating_add(self.accumulated);

        if self.high == reach {
            // Window closed; everything buffered is now contiguous.
            self.confirmed = self.high;
            self.accumulated = 0;
            self.gap_since = None;
            return Decision::Apply;
        }

        // Either positions are missing (high > reach) or weights overshot
        // the window (high < reach, a server-side accounting fault). Both
        // resolve the same way: hold events and let a difference fetch
        // rebaseline the stream.
        if self.gap_since.is_none() {
            self.gap_since = Some(now);
        }
        Decision::Buffer
    }

    /// Installs a baseline from a difference fetch or an explicit reload.
    ///
    /// `confirmed` never moves backwards; the observation window resets so
    /// that replayed events re-establish contiguity from the new baseline.
    pub fn adopt(&mut self, confirmed: Position) {
        if self.initialized {
            self.confirmed = self.confirmed.max(confirmed);
        } else {
            self.initialized = true;
            self.confirmed = confirmed;
        }
        self.high = self.confirmed;
        self.accumulated = 0;
        self.gap_since = None;
    }

    /// Marks a difference fetch as outstanding; live events buffer until
    /// [`PositionTracker::finish_request`].
    pub fn begin_request(&mut self) {
        self.requesting = true;
        self.gap_since = None;
    }

    /// Clears the outstanding-fetch mark.
    pub fn finish_request(&mut self) {
        self.requesting = false;
    }

    /// Returns the tracker to its uninitialized state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Highest contiguously-applied position.
    pub fn confirmed(&self) -> Position {
        self.confirmed
    }

    /// Highest observed position.
    pub fn high(&self) -> Position {
        self.high
    }

    /// True once a baseline exists.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True while a difference fetch is outstanding.
    pub fn is_requesting(&self) -> bool {
        self.requesting
    }

    /// True while a gap is open and not yet being fetched.
    pub fn has_open_gap(&self) -> bool {
        self.gap_since.is_some()
    }

    /// When the open gap's coalesce window elapses, if a gap is open.
    pub fn coalesce_deadline(&self, window: Duration) -> Option<Instant> {
        self.gap_since.map(|since| since + window)
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}
