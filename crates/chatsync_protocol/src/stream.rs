//! Stream identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The counter value a stream has reached.
///
/// Positions are monotonically increasing per stream and never reused.
pub type Position = u64;

/// Identifier of a conversation-like container with independent ordering.
///
/// Channel ids are assigned by the server; the client never mints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical counter space over which ordering and gap detection are tracked.
///
/// Exactly one global stream exists for the account; channel streams exist
/// one per channel and are created and destroyed as the client joins and
/// leaves channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamId {
    /// The account-wide stream (direct messages, service notifications).
    Global,
    /// A channel's private stream.
    Channel(ChannelId),
}

impl StreamId {
    /// Returns true for the global stream.
    pub fn is_global(&self) -> bool {
        matches!(self, StreamId::Global)
    }

    /// Returns the channel id, if this is a channel stream.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            StreamId::Global => None,
            StreamId::Channel(id) => Some(*id),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Global => write!(f, "global"),
            StreamId::Channel(id) => write!(f, "channel/{id}"),
        }
    }
}

impl From<ChannelId> for StreamId {
    fn from(id: ChannelId) -> Self {
        StreamId::Channel(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_display() {
        assert_eq!(StreamId::Global.to_string(), "global");
        assert_eq!(StreamId::Channel(ChannelId(42)).to_string(), "channel/42");
    }

    #[test]
    fn stream_accessors() {
        assert!(StreamId::Global.is_global());
        assert_eq!(StreamId::Global.channel(), None);

        let stream = StreamId::from(ChannelId(7));
        assert!(!stream.is_global());
        assert_eq!(stream.channel(), Some(ChannelId(7)));
    }
}
