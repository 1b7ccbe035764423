//! Transport seam for difference fetches.

use crate::error::FetchError;
use chatsync_protocol::{DifferenceRequest, DifferenceResponse, StreamId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;

/// Serves difference (catch-up) requests against the authoritative source.
///
/// Implementations wrap the real network layer; failures surface as typed
/// [`FetchError`]s, never as panics. The returned future must be `Send`
/// because fetches run as spawned tasks.
pub trait DifferenceTransport: Send + Sync + 'static {
    /// Requests the changes a stream accumulated past a known position.
    fn request_difference(
        &self,
        request: DifferenceRequest,
    ) -> impl Future<Output = Result<DifferenceResponse, FetchError>> + Send;
}

/// A scripted transport for tests.
///
/// Responses are queued per stream and handed out in order; an empty queue
/// is a protocol error, which keeps tests honest about how many requests
/// they expect. Every request is recorded for assertions.
#[derive(Debug, Default)]
pub struct MockTransport {
    queues: Mutex<HashMap<StreamId, VecDeque<Result<DifferenceResponse, FetchError>>>>,
    requests: Mutex<Vec<DifferenceRequest>>,
}

impl MockTransport {
    /// Creates an empty mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response for a stream.
    pub fn push_response(&self, stream: StreamId, response: DifferenceResponse) {
        self.queues
            .lock()
            .entry(stream)
            .or_default()
            .push_back(Ok(response));
    }

    /// Queues a failure for a stream.
    pub fn push_failure(&self, stream: StreamId, error: FetchError) {
        self.queues
            .lock()
            .entry(stream)
            .or_default()
            .push_back(Err(error));
    }

    /// All requests seen so far.
    pub fn requests(&self) -> Vec<DifferenceRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests seen so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl DifferenceTransport for MockTransport {
    fn request_difference(
        &self,
        request: DifferenceRequest,
    ) -> impl Future<Output = Result<DifferenceResponse, FetchError>> + Send {
        self.requests.lock().push(request);
        let result = self
            .queues
            .lock()
            .get_mut(&request.stream)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(FetchError::Protocol(format!(
                    "no scripted response for {}",
                    request.stream
                )))
            });
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_in_order() {
        let transport = MockTransport::new();
        let stream = StreamId::Global;
        transport.push_response(stream, DifferenceResponse::complete(stream, 10, vec![]));
        transport.push_failure(stream, FetchError::Timeout);

        let first = transport
            .request_difference(DifferenceRequest::new(stream, 4, 100))
            .await
            .unwrap();
        assert_eq!(first.new_confirmed, 10);

        let second = transport
            .request_difference(DifferenceRequest::new(stream, 10, 100))
            .await;
        assert_eq!(second, Err(FetchError::Timeout));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].from_position, 4);
        assert_eq!(requests[1].from_position, 10);
    }

    #[tokio::test]
    async fn unscripted_stream_is_a_protocol_error() {
        let transport = MockTransport::new();
        let result = transport
            .request_difference(DifferenceRequest::new(StreamId::Global, 0, 10))
            .await;
        assert!(matches!(result, Err(FetchError::Protocol(_))));
    }
}
