//! Property-based test generators using proptest.

use chatsync_protocol::{ChannelId, EventKind, StreamId};
use proptest::prelude::*;

/// Strategy for channel ids.
pub fn channel_id_strategy() -> impl Strategy<Value = ChannelId> {
    (1u64..1_000_000).prop_map(ChannelId)
}

/// Strategy for stream ids, global about one time in eight.
pub fn stream_id_strategy() -> impl Strategy<Value = StreamId> {
    prop_oneof![
        1 => Just(StreamId::Global),
        7 => channel_id_strategy().prop_map(StreamId::Channel),
    ]
}

/// Strategy for content-bearing event kinds.
pub fn event_kind_strategy() -> impl Strategy<Value = EventKind> {
    prop_oneof![
        Just(EventKind::NewMessage),
        Just(EventKind::EditMessage),
        Just(EventKind::DeleteMessage),
        Just(EventKind::Membership),
        Just(EventKind::Settings),
    ]
}

/// Strategy for opaque payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for a delivery order: a shuffled permutation of `0..len`.
pub fn delivery_order_strategy(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<usize>>()).prop_shuffle()
}
