//! Difference (catch-up) request and response messages.

use crate::event::UpdateEvent;
use crate::stream::{Position, StreamId};
use serde::{Deserialize, Serialize};

/// A request for the changes a stream accumulated past a known position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferenceRequest {
    /// Stream to catch up on.
    pub stream: StreamId,
    /// The client's confirmed position; the response covers `(from, ..]`.
    pub from_position: Position,
    /// Maximum number of events the server should return in one response.
    pub limit: u32,
}

impl DifferenceRequest {
    /// Creates a request.
    pub fn new(stream: StreamId, from_position: Position, limit: u32) -> Self {
        Self {
            stream,
            from_position,
            limit,
        }
    }
}

/// One slice of a catch-up.
///
/// `new_confirmed` is the position the client may adopt after applying
/// `events`; with `more == true` the server has further changes and the
/// client should issue another request starting at `new_confirmed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifferenceResponse {
    /// Stream this response covers.
    pub stream: StreamId,
    /// Position reached after applying the returned events.
    pub new_confirmed: Position,
    /// Events in `(from_position, new_confirmed]`, position order.
    pub events: Vec<UpdateEvent>,
    /// True when further changes remain past `new_confirmed`.
    pub more: bool,
    /// For global-stream responses: the envelope-order counter the client
    /// should expect next envelopes to follow. Absent on channel responses.
    pub envelope_order: Option<u64>,
}

impl DifferenceResponse {
    /// Creates a final (no more data) response.
    pub fn complete(stream: StreamId, new_confirmed: Position, events: Vec<UpdateEvent>) -> Self {
        Self {
            stream,
            new_confirmed,
            events,
            more: false,
            envelope_order: None,
        }
    }

    /// Creates a partial response; the client should fetch again from
    /// `new_confirmed`.
    pub fn partial(stream: StreamId, new_confirmed: Position, events: Vec<UpdateEvent>) -> Self {
        Self {
            stream,
            new_confirmed,
            events,
            more: true,
            envelope_order: None,
        }
    }

    /// Attaches the envelope-order baseline (global-stream responses).
    pub fn with_envelope_order(mut self, order: u64) -> Self {
        self.envelope_order = Some(order);
        self
    }
}
