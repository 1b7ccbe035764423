//! Update events.

use crate::stream::{Position, StreamId};
use serde::{Deserialize, Serialize};

/// The kind of change an event describes.
///
/// The synchronization engine never interprets kinds; they are carried
/// through to the applier together with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// A new message was posted.
    NewMessage,
    /// An existing message was edited.
    EditMessage,
    /// A message was deleted.
    DeleteMessage,
    /// A membership change (join, leave, role change).
    Membership,
    /// A settings change (title, pins, notification defaults).
    Settings,
    /// A position-only probe with no content; conventionally `weight == 0`.
    Probe,
}

impl EventKind {
    /// Converts to a numeric code for compact encodings.
    pub fn to_code(&self) -> u8 {
        match self {
            EventKind::NewMessage => 1,
            EventKind::EditMessage => 2,
            EventKind::DeleteMessage => 3,
            EventKind::Membership => 4,
            EventKind::Settings => 5,
            EventKind::Probe => 6,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EventKind::NewMessage),
            2 => Some(EventKind::EditMessage),
            3 => Some(EventKind::DeleteMessage),
            4 => Some(EventKind::Membership),
            5 => Some(EventKind::Settings),
            6 => Some(EventKind::Probe),
            _ => None,
        }
    }
}

/// A single change notification for one stream.
///
/// `position` is the counter value the stream reaches *after* this event is
/// applied; `weight` is how many counter units the event consumes (normally
/// 1, more for batched changes, 0 for a position-only probe). The payload is
/// opaque to the engine and is handed to the applier untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// The stream this event belongs to.
    pub stream: StreamId,
    /// Counter value reached after applying this event.
    pub position: Position,
    /// Counter units consumed by this event.
    pub weight: u32,
    /// Kind of change, carried through uninterpreted.
    pub kind: EventKind,
    /// Opaque domain payload.
    pub payload: Vec<u8>,
}

impl UpdateEvent {
    /// Creates an event.
    pub fn new(
        stream: StreamId,
        position: Position,
        weight: u32,
        kind: EventKind,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            stream,
            position,
            weight,
            kind,
            payload,
        }
    }

    /// Creates a position-only probe (weight 0, empty payload).
    pub fn probe(stream: StreamId, position: Position) -> Self {
        Self {
            stream,
            position,
            weight: 0,
            kind: EventKind::Probe,
            payload: Vec::new(),
        }
    }

    /// Returns true for position-only probes.
    pub fn is_probe(&self) -> bool {
        self.weight == 0
    }
}
