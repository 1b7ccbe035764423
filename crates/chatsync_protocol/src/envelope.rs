//! Envelopes: atomically-delivered event batches.

use crate::event::UpdateEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of events one envelope may carry.
pub const MAX_EVENTS_PER_ENVELOPE: usize = 1024;

/// Maximum payload size of a single event, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 1 << 20;

/// Validation failures for an envelope.
///
/// A failed validation condemns the whole envelope; none of its events can
/// be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The global order counter must be nonzero.
    #[error("global order must be nonzero")]
    ZeroGlobalOrder,

    /// Too many events in one envelope.
    #[error("envelope carries {0} events, limit is {MAX_EVENTS_PER_ENVELOPE}")]
    TooManyEvents(usize),

    /// Event positions start at 1.
    #[error("event position must be nonzero")]
    ZeroPosition,

    /// An event cannot consume more counter units than its stream has counted.
    #[error("event weight {weight} exceeds position {position}")]
    WeightExceedsPosition {
        /// Claimed weight.
        weight: u32,
        /// Claimed position.
        position: u64,
    },

    /// Event payload exceeds the size limit.
    #[error("payload of {0} bytes exceeds limit of {MAX_PAYLOAD_BYTES}")]
    PayloadTooLarge(usize),
}

/// A batch of events delivered atomically by the transport.
///
/// `global_order` is the envelope's value in the envelope-order counter
/// space. It is used only to decide whether envelopes were lost or
/// reordered; it says nothing about any stream's per-stream positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope-order counter value.
    pub global_order: u64,
    /// Server-side emission time, seconds since the epoch.
    pub date: u64,
    /// Events carried by this envelope.
    pub events: Vec<UpdateEvent>,
}

impl Envelope {
    /// Creates an envelope.
    pub fn new(global_order: u64, date: u64, events: Vec<UpdateEvent>) -> Self {
        Self {
            global_order,
            date,
            events,
        }
    }

    /// Checks the envelope against structural limits.
    ///
    /// An envelope with no events is valid; it advances the envelope order
    /// without carrying content.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.global_order == 0 {
            return Err(EnvelopeError::ZeroGlobalOrder);
        }
        if self.events.len() > MAX_EVENTS_PER_ENVELOPE {
            return Err(EnvelopeError::TooManyEvents(self.events.len()));
        }
        for event in &self.events {
            if event.position == 0 {
                return Err(EnvelopeError::ZeroPosition);
            }
            if u64::from(event.weight) > event.position {
                return Err(EnvelopeError::WeightExceedsPosition {
                    weight: event.weight,
                    position: event.position,
                });
            }
            if event.payload.len() > MAX_PAYLOAD_BYTES {
                return Err(EnvelopeError::PayloadTooLarge(event.payload.len()));
            }
        }
        Ok(())
    }

    /// Returns the number of events carried.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the envelope carries no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
