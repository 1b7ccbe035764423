//! Configuration for the synchronization engine.

use std::time::Duration;

/// Configuration for the engine's timers, limits, and retry behavior.
///
/// Timing constants are tuning parameters; the defaults suit an interactive
/// chat client on a reasonable network.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a stream tolerates an open gap before fetching a difference.
    ///
    /// Near-simultaneous reordered deliveries usually close a gap within a
    /// few hundred milliseconds; fetching immediately would be wasteful.
    pub coalesce_window: Duration,
    /// How long the sequencer waits for a missing predecessor envelope
    /// before abandoning its buffer and forcing a global resync.
    pub sequencer_wait: Duration,
    /// Maximum events requested per difference response.
    pub fetch_limit: u32,
    /// Maximum chained difference rounds in one catch-up before the server
    /// is considered misbehaving.
    pub max_difference_rounds: u32,
    /// Maximum out-of-order envelopes buffered by the sequencer.
    pub max_pending_envelopes: usize,
    /// Maximum live events buffered per stream while a gap is open.
    pub max_buffered_events: usize,
    /// Depth of the engine's command queue.
    pub command_queue_depth: usize,
    /// Retry behavior for failed difference fetches.
    pub backoff: BackoffConfig,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            coalesce_window: Duration::from_millis(200),
            sequencer_wait: Duration::from_secs(1),
            fetch_limit: 100,
            max_difference_rounds: 32,
            max_pending_envelopes: 64,
            max_buffered_events: 1024,
            command_queue_depth: 256,
            backoff: BackoffConfig::default(),
        }
    }

    /// Sets the coalesce window.
    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    /// Sets the sequencer's bounded wait.
    pub fn with_sequencer_wait(mut self, wait: Duration) -> Self {
        self.sequencer_wait = wait;
        self
    }

    /// Sets the per-response fetch limit.
    pub fn with_fetch_limit(mut self, limit: u32) -> Self {
        self.fetch_limit = limit;
        self
    }

    /// Sets the maximum chained difference rounds.
    pub fn with_max_difference_rounds(mut self, rounds: u32) -> Self {
        self.max_difference_rounds = rounds;
        self
    }

    /// Sets the sequencer's pending-envelope bound.
    pub fn with_max_pending_envelopes(mut self, limit: usize) -> Self {
        self.max_pending_envelopes = limit;
        self
    }

    /// Sets the per-stream buffered-event bound.
    pub fn with_max_buffered_events(mut self, limit: usize) -> Self {
        self.max_buffered_events = limit;
        self
    }

    /// Sets the retry configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry delays for failed difference fetches.
///
/// The delay doubles on each consecutive failure for a stream, up to
/// `base * cap_factor`, and resets to `base` on the first success. State is
/// kept per stream, so one struggling channel never throttles the rest.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Base retry delay.
    pub base: Duration,
    /// Cap, as a multiple of the base delay.
    pub cap_factor: u32,
}

impl BackoffConfig {
    /// Creates a backoff configuration with the given base delay.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            cap_factor: 64,
        }
    }

    /// Sets the cap factor.
    pub fn with_cap_factor(mut self, cap_factor: u32) -> Self {
        self.cap_factor = cap_factor.max(1);
        self
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = EngineConfig::new()
            .with_coalesce_window(Duration::from_millis(50))
            .with_sequencer_wait(Duration::from_millis(400))
            .with_fetch_limit(10)
            .with_max_pending_envelopes(8)
            .with_backoff(BackoffConfig::new(Duration::from_millis(100)).with_cap_factor(16));

        assert_eq!(config.coalesce_window, Duration::from_millis(50));
        assert_eq!(config.sequencer_wait, Duration::from_millis(400));
        assert_eq!(config.fetch_limit, 10);
        assert_eq!(config.max_pending_envelopes, 8);
        assert_eq!(config.backoff.base, Duration::from_millis(100));
        assert_eq!(config.backoff.cap_factor, 16);
    }

    #[test]
    fn cap_factor_floor() {
        let backoff = BackoffConfig::new(Duration::from_millis(100)).with_cap_factor(0);
        assert_eq!(backoff.cap_factor, 1);
    }
}
