//! Event and envelope fixture builders.

use chatsync_protocol::{Envelope, EventKind, Position, StreamId, UpdateEvent};

/// Builds a weight-1 message event whose payload encodes its position, so
/// tests can tell recovered copies apart from fabricated ones.
pub fn message_event(stream: StreamId, position: Position) -> UpdateEvent {
    UpdateEvent::new(
        stream,
        position,
        1,
        EventKind::NewMessage,
        position.to_be_bytes().to_vec(),
    )
}

/// Builds a weighted batch event (several counter units in one event).
pub fn batch_event(stream: StreamId, position: Position, weight: u32) -> UpdateEvent {
    UpdateEvent::new(
        stream,
        position,
        weight,
        EventKind::Membership,
        position.to_be_bytes().to_vec(),
    )
}

/// Builds a contiguous run of weight-1 message events covering
/// `(after, after + count]`.
pub fn contiguous_events(stream: StreamId, after: Position, count: u64) -> Vec<UpdateEvent> {
    (after + 1..=after + count)
        .map(|position| message_event(stream, position))
        .collect()
}

/// Wraps events into an envelope with the given order.
pub fn envelope(global_order: u64, events: Vec<UpdateEvent>) -> Envelope {
    Envelope::new(global_order, 1_700_000_000 + global_order, events)
}

/// Wraps each event into its own envelope, with consecutive orders starting
/// at `first_order`.
pub fn one_event_envelopes(first_order: u64, events: Vec<UpdateEvent>) -> Vec<Envelope> {
    events
        .into_iter()
        .enumerate()
        .map(|(index, event)| envelope(first_order + index as u64, vec![event]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_protocol::ChannelId;

    #[test]
    fn contiguous_run_covers_the_span() {
        let stream = StreamId::Channel(ChannelId(2));
        let events = contiguous_events(stream, 4, 3);
        let positions: Vec<Position> = events.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![5, 6, 7]);
        assert!(events.iter().all(|e| e.weight == 1));
    }

    #[test]
    fn one_event_envelopes_use_consecutive_orders() {
        let stream = StreamId::Global;
        let envelopes = one_event_envelopes(101, contiguous_events(stream, 0, 3));
        let orders: Vec<u64> = envelopes.iter().map(|e| e.global_order).collect();
        assert_eq!(orders, vec![101, 102, 103]);
        assert!(envelopes.iter().all(|e| e.events.len() == 1));
    }
}
