//! An in-memory authoritative stream server.

use chatsync_protocol::{
    DifferenceRequest, DifferenceResponse, Envelope, EventKind, Position, StreamId, UpdateEvent,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Failures the server can be scripted to produce.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServeError {
    /// The server is in a scripted outage.
    #[error("server unavailable")]
    Unavailable,

    /// The stream's gap was marked too large to enumerate.
    #[error("gap too large to enumerate")]
    GapTooLarge,
}

#[derive(Debug, Default)]
struct ServerState {
    logs: HashMap<StreamId, Vec<UpdateEvent>>,
    heads: HashMap<StreamId, Position>,
    next_order: u64,
    outage: bool,
    unenumerable: HashSet<StreamId>,
}

/// An in-memory authoritative source of truth.
///
/// The server keeps a full per-stream event log. Tests push events to grow
/// the logs, wrap them into envelopes (with or without losing and
/// reordering them on the way), and serve difference requests from any
/// baseline. Scripted outages and unenumerable gaps exercise the engine's
/// failure paths.
#[derive(Debug, Default)]
pub struct StreamServer {
    inner: Mutex<ServerState>,
}

impl StreamServer {
    /// Creates an empty server; envelope orders start at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a weight-1 message event to a stream's log.
    pub fn push_message(&self, stream: StreamId, payload: Vec<u8>) -> UpdateEvent {
        self.push(stream, 1, EventKind::NewMessage, payload)
    }

    /// Appends a weighted event to a stream's log.
    pub fn push(
        &self,
        stream: StreamId,
        weight: u32,
        kind: EventKind,
        payload: Vec<u8>,
    ) -> UpdateEvent {
        let mut state = self.inner.lock();
        let head = state.heads.entry(stream).or_insert(0);
        *head += u64::from(weight.max(1));
        let event = UpdateEvent::new(stream, *head, weight.max(1), kind, payload);
        state.logs.entry(stream).or_default().push(event.clone());
        event
    }

    /// Builds a probe at a stream's current head. Probes are not logged;
    /// they carry no counter units.
    pub fn probe(&self, stream: StreamId) -> UpdateEvent {
        let state = self.inner.lock();
        let head = state.heads.get(&stream).copied().unwrap_or(0);
        UpdateEvent::probe(stream, head)
    }

    /// Wraps events into the next envelope in order.
    pub fn envelope(&self, events: Vec<UpdateEvent>) -> Envelope {
        let mut state = self.inner.lock();
        state.next_order += 1;
        Envelope::new(state.next_order, 1_700_000_000 + state.next_order, events)
    }

    /// Burns envelope orders, as if that many envelopes were sent and lost.
    pub fn drop_envelopes(&self, count: u64) {
        self.inner.lock().next_order += count;
    }

    /// A stream's current head position.
    pub fn head(&self, stream: StreamId) -> Position {
        self.inner.lock().heads.get(&stream).copied().unwrap_or(0)
    }

    /// The order of the most recently built envelope.
    pub fn current_order(&self) -> u64 {
        self.inner.lock().next_order
    }

    /// Starts or ends a scripted outage; during an outage every difference
    /// request fails as unavailable.
    pub fn set_outage(&self, outage: bool) {
        self.inner.lock().outage = outage;
    }

    /// Marks a stream's history as too large to enumerate.
    pub fn set_unenumerable(&self, stream: StreamId, unenumerable: bool) {
        let mut state = self.inner.lock();
        if unenumerable {
            state.unenumerable.insert(stream);
        } else {
            state.unenumerable.remove(&stream);
        }
    }

    /// Serves one difference request.
    pub fn handle_difference(
        &self,
        request: DifferenceRequest,
    ) -> Result<DifferenceResponse, ServeError> {
        let state = self.inner.lock();
        if state.outage {
            return Err(ServeError::Unavailable);
        }
        if state.unenumerable.contains(&request.stream) {
            return Err(ServeError::GapTooLarge);
        }

        let empty = Vec::new();
        let log = state.logs.get(&request.stream).unwrap_or(&empty);
        let head = state.heads.get(&request.stream).copied().unwrap_or(0);

        let mut events: Vec<UpdateEvent> = log
            .iter()
            .filter(|event| event.position > request.from_position)
            .cloned()
            .collect();
        let remaining = events.len().saturating_sub(request.limit.max(1) as usize);
        events.truncate(request.limit.max(1) as usize);

        let new_confirmed = match events.last() {
            Some(last) => last.position,
            None => head.max(request.from_position),
        };
        let more = remaining > 0;

        let mut response = if more {
            DifferenceResponse::partial(request.stream, new_confirmed, events)
        } else {
            DifferenceResponse::complete(request.stream, new_confirmed, events)
        };
        if request.stream == StreamId::Global {
            response = response.with_envelope_order(state.next_order);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_protocol::ChannelId;

    const STREAM: StreamId = StreamId::Channel(ChannelId(4));

    #[test]
    fn positions_and_orders_advance() {
        let server = StreamServer::new();
        let first = server.push_message(STREAM, vec![1]);
        let second = server.push(STREAM, 3, EventKind::Membership, vec![2]);
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 4);
        assert_eq!(server.head(STREAM), 4);

        let envelope = server.envelope(vec![first, second]);
        assert_eq!(envelope.global_order, 1);
        assert!(envelope.validate().is_ok());
        assert_eq!(server.envelope(vec![]).global_order, 2);
    }

    #[test]
    fn difference_covers_the_requested_span() {
        let server = StreamServer::new();
        for i in 0..6 {
            server.push_message(STREAM, vec![i]);
        }

        let response = server
            .handle_difference(DifferenceRequest::new(STREAM, 2, 100))
            .unwrap();
        assert_eq!(response.new_confirmed, 6);
        assert!(!response.more);
        let positions: Vec<Position> = response.events.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![3, 4, 5, 6]);
    }

    #[test]
    fn difference_pages_with_more() {
        let server = StreamServer::new();
        for i in 0..5 {
            server.push_message(STREAM, vec![i]);
        }

        let first = server
            .handle_difference(DifferenceRequest::new(STREAM, 0, 2))
            .unwrap();
        assert_eq!(first.new_confirmed, 2);
        assert!(first.more);

        let second = server
            .handle_difference(DifferenceRequest::new(STREAM, first.new_confirmed, 2))
            .unwrap();
        assert_eq!(second.new_confirmed, 4);
        assert!(second.more);

        let last = server
            .handle_difference(DifferenceRequest::new(STREAM, second.new_confirmed, 2))
            .unwrap();
        assert_eq!(last.new_confirmed, 5);
        assert!(!last.more);
    }

    #[test]
    fn caught_up_client_gets_empty_response() {
        let server = StreamServer::new();
        server.push_message(STREAM, vec![1]);

        let response = server
            .handle_difference(DifferenceRequest::new(STREAM, 1, 100))
            .unwrap();
        assert!(response.events.is_empty());
        assert_eq!(response.new_confirmed, 1);
        assert!(!response.more);
    }

    #[test]
    fn global_difference_reports_envelope_order() {
        let server = StreamServer::new();
        let event = server.push_message(StreamId::Global, vec![9]);
        server.envelope(vec![event]);
        server.drop_envelopes(2);

        let response = server
            .handle_difference(DifferenceRequest::new(StreamId::Global, 0, 100))
            .unwrap();
        assert_eq!(response.envelope_order, Some(3));
        assert_eq!(response.new_confirmed, 1);
    }

    #[test]
    fn scripted_failures() {
        let server = StreamServer::new();
        server.set_outage(true);
        assert_eq!(
            server.handle_difference(DifferenceRequest::new(STREAM, 0, 10)),
            Err(ServeError::Unavailable)
        );
        server.set_outage(false);

        server.set_unenumerable(STREAM, true);
        assert_eq!(
            server.handle_difference(DifferenceRequest::new(STREAM, 0, 10)),
            Err(ServeError::GapTooLarge)
        );
        server.set_unenumerable(STREAM, false);
        assert!(server
            .handle_difference(DifferenceRequest::new(STREAM, 0, 10))
            .is_ok());
    }
}
