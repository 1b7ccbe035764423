//! Chained difference fetching for one stream.

use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::transport::DifferenceTransport;
use chatsync_protocol::{DifferenceRequest, Position, StreamId, UpdateEvent};
use std::sync::Arc;
use tracing::debug;

/// The result of a completed catch-up: a new baseline plus every event
/// needed to reach it.
#[derive(Debug)]
pub struct CatchUp {
    /// Stream the catch-up covered.
    pub stream: StreamId,
    /// Baseline position to adopt.
    pub new_confirmed: Position,
    /// Recovered events in position order.
    pub events: Vec<UpdateEvent>,
    /// Envelope-order baseline from a global catch-up, when reported.
    pub envelope_order: Option<u64>,
}

/// Issues difference requests against one stream and follows the `more`
/// chain until the server reports the catch-up complete.
pub struct DifferenceFetcher<T> {
    transport: Arc<T>,
    limit: u32,
    max_rounds: u32,
}

impl<T> Clone for DifferenceFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            limit: self.limit,
            max_rounds: self.max_rounds,
        }
    }
}

impl<T: DifferenceTransport> DifferenceFetcher<T> {
    /// Creates a fetcher over the given transport.
    pub fn new(transport: Arc<T>, config: &EngineConfig) -> Self {
        Self {
            transport,
            limit: config.fetch_limit,
            max_rounds: config.max_difference_rounds.max(1),
        }
    }

    /// Runs one full catch-up from `from`.
    ///
    /// Responses are sanity-checked: a response for a different stream or a
    /// baseline below the request's floor is a protocol error, as is a
    /// `more` chain that outlives `max_difference_rounds`.
    pub async fn run(&self, stream: StreamId, from: Position) -> Result<CatchUp, FetchError> {
        let mut cursor = from;
        let mut events = Vec::new();
        let mut envelope_order = None;

        for round in 0..self.max_rounds {
            let request = DifferenceRequest::new(stream, cursor, self.limit);
            let response = self.transport.request_difference(request).await?;

            if response.stream != stream {
                return Err(FetchError::Protocol(format!(
                    "difference for {stream} answered with {}",
                    response.stream
                )));
            }
            if response.new_confirmed < cursor {
                return Err(FetchError::Protocol(format!(
                    "difference for {stream} moved backwards: {} < {cursor}",
                    response.new_confirmed
                )));
            }

            debug!(
                %stream,
                round,
                from = cursor,
                new_confirmed = response.new_confirmed,
                recovered = response.events.len(),
                more = response.more,
                "difference round"
            );

            cursor = response.new_confirmed;
            if response.envelope_order.is_some() {
                envelope_order = response.envelope_order;
            }
            events.extend(response.events);

            if !response.more {
                return Ok(CatchUp {
                    stream,
                    new_confirmed: cursor,
                    events,
                    envelope_order,
                });
            }
        }

        Err(FetchError::Protocol(format!(
            "difference chain for {stream} exceeded {} rounds",
            self.max_rounds
        )))
    }
}
