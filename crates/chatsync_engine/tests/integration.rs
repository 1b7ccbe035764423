//! Integration tests: the engine against an in-memory authoritative server.

use chatsync_engine::{
    DifferenceTransport, EngineConfig, EngineHandle, FetchError, RecordingApplier,
    RecordingReporter, SyncCoordinator, SyncEngine,
};
use chatsync_protocol::{
    ChannelId, DifferenceRequest, DifferenceResponse, Envelope, Position, StreamId,
};
use chatsync_testkit::prelude::*;
use proptest::prelude::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const STREAM: StreamId = StreamId::Channel(ChannelId(7));

/// A transport that serves difference requests from the in-memory server.
struct ServerTransport {
    server: Arc<StreamServer>,
}

impl DifferenceTransport for ServerTransport {
    fn request_difference(
        &self,
        request: DifferenceRequest,
    ) -> impl Future<Output = Result<DifferenceResponse, FetchError>> + Send {
        let result = self.server.handle_difference(request).map_err(|e| match e {
            ServeError::Unavailable => FetchError::transport_retryable(e.to_string()),
            ServeError::GapTooLarge => FetchError::GapTooLarge,
        });
        async move { result }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn test_config() -> EngineConfig {
    EngineConfig::new()
        .with_coalesce_window(Duration::from_millis(200))
        .with_sequencer_wait(Duration::from_millis(500))
}

fn start_engine(
    server: Arc<StreamServer>,
    config: EngineConfig,
) -> (EngineHandle, Arc<RecordingApplier>, Arc<RecordingReporter>) {
    init_tracing();
    let applier = Arc::new(RecordingApplier::new());
    let reporter = Arc::new(RecordingReporter::new());
    let transport = Arc::new(ServerTransport { server });
    let (engine, handle) = SyncEngine::new(
        config,
        transport,
        Arc::clone(&applier),
        Arc::clone(&reporter),
    );
    tokio::spawn(engine.run());
    (handle, applier, reporter)
}

#[tokio::test(start_paused = true)]
async fn live_delivery_applies_in_order() {
    let server = Arc::new(StreamServer::new());
    let (handle, applier, _) = start_engine(Arc::clone(&server), test_config());

    for i in 0..4u8 {
        let event = server.push_message(STREAM, vec![i]);
        handle.deliver(server.envelope(vec![event])).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(applier.positions(STREAM), vec![1, 2, 3, 4]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lost_envelope_recovered_by_global_resync() {
    let server = Arc::new(StreamServer::new());
    let (handle, applier, _) = start_engine(Arc::clone(&server), test_config());

    // Envelope 1 arrives; envelope 2 is lost in flight; envelope 3 arrives
    // early and waits for its predecessor until the bounded wait expires.
    let g1 = server.push_message(StreamId::Global, vec![1]);
    handle.deliver(server.envelope(vec![g1])).await.unwrap();

    let g2 = server.push_message(StreamId::Global, vec![2]);
    let _lost = server.envelope(vec![g2]);

    let g3 = server.push_message(StreamId::Global, vec![3]);
    handle.deliver(server.envelope(vec![g3])).await.unwrap();

    // Wait past the sequencer's bounded wait; the global difference fetch
    // recovers the lost change and re-baselines the envelope order.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(applier.positions(StreamId::Global), vec![1, 2, 3]);

    // Live delivery resumes seamlessly afterwards.
    let g4 = server.push_message(StreamId::Global, vec![4]);
    handle.deliver(server.envelope(vec![g4])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(applier.positions(StreamId::Global), vec![1, 2, 3, 4]);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn channel_gap_recovered_by_channel_difference() {
    let server = Arc::new(StreamServer::new());
    let (handle, applier, _) = start_engine(Arc::clone(&server), test_config());
    handle.install_baseline(STREAM, 0).await.unwrap();

    // Changes 1 and 2 never reach the client live; change 3 does, opening a
    // per-channel gap that the coalesce window then repairs.
    server.push_message(STREAM, vec![1]);
    server.push_message(STREAM, vec![2]);
    let third = server.push_message(STREAM, vec![3]);
    handle.deliver(server.envelope(vec![third])).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    // The live copy of 3 was covered by the catch-up; it applies once.
    assert_eq!(applier.positions(STREAM), vec![1, 2, 3]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn chained_difference_rounds_cover_large_gaps() {
    let server = Arc::new(StreamServer::new());
    let (handle, applier, _) = start_engine(
        Arc::clone(&server),
        test_config().with_fetch_limit(3),
    );
    handle.install_baseline(STREAM, 0).await.unwrap();

    for i in 0..9u8 {
        server.push_message(STREAM, vec![i]);
    }
    let tenth = server.push_message(STREAM, vec![9]);
    handle.deliver(server.envelope(vec![tenth])).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        applier.positions(STREAM),
        (1..=10).collect::<Vec<Position>>()
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn outage_retries_until_connectivity_returns() {
    let server = Arc::new(StreamServer::new());
    let (handle, applier, reporter) = start_engine(Arc::clone(&server), test_config());
    handle.install_baseline(STREAM, 0).await.unwrap();

    server.set_outage(true);
    for i in 0..5u8 {
        server.push_message(STREAM, vec![i]);
    }
    let sixth = server.push_message(STREAM, vec![5]);
    handle.deliver(server.envelope(vec![sixth])).await.unwrap();

    // Coalesce fires, the fetch fails, and capped backoff keeps retrying.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(applier.is_empty());
    assert!(reporter.gaps().is_empty());

    server.set_outage(false);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        applier.positions(STREAM),
        (1..=6).collect::<Vec<Position>>()
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unenumerable_gap_reports_and_reload_restores_flow() {
    let server = Arc::new(StreamServer::new());
    let (handle, applier, reporter) = start_engine(Arc::clone(&server), test_config());
    handle.install_baseline(STREAM, 0).await.unwrap();

    server.set_unenumerable(STREAM, true);
    for i in 0..3u8 {
        server.push_message(STREAM, vec![i]);
    }
    let fourth = server.push_message(STREAM, vec![3]);
    handle.deliver(server.envelope(vec![fourth])).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(reporter.gaps(), vec![STREAM]);
    assert!(applier.is_empty());

    // The owner reloads the channel wholesale and seeds the new baseline;
    // live delivery picks up from there.
    server.set_unenumerable(STREAM, false);
    handle.install_baseline(STREAM, server.head(STREAM)).await.unwrap();
    let fifth = server.push_message(STREAM, vec![4]);
    handle.deliver(server.envelope(vec![fifth])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(applier.positions(STREAM), vec![5]);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn weighted_batches_close_multi_unit_spans() {
    let server = Arc::new(StreamServer::new());
    let (handle, applier, _) = start_engine(Arc::clone(&server), test_config());

    let first = server.push_message(STREAM, vec![1]);
    let batch = server.push(
        STREAM,
        3,
        chatsync_protocol::EventKind::Membership,
        vec![2],
    );
    let after = server.push_message(STREAM, vec![3]);

    // The batch and its successor arrive reordered; the weight accounting
    // still closes the span without a fetch.
    handle.deliver(server.envelope(vec![first])).await.unwrap();
    handle.deliver(server.envelope(vec![after])).await.unwrap();
    handle.deliver(server.envelope(vec![batch])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(applier.positions(STREAM), vec![1, 4, 5]);
    assert_eq!(server.head(STREAM), 5);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stuck_channel_never_delays_other_streams() {
    let server = Arc::new(StreamServer::new());
    let other = StreamId::Channel(ChannelId(8));
    let (handle, applier, _) = start_engine(Arc::clone(&server), test_config());
    handle.install_baseline(STREAM, 0).await.unwrap();

    // One channel is missing changes and its server history is unreachable,
    // so it sits in requesting with backoff. The other channel flows freely.
    server.set_outage(true);
    server.push_message(STREAM, vec![0]);
    let second = server.push_message(STREAM, vec![1]);
    handle.deliver(server.envelope(vec![second])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(applier.positions(STREAM).is_empty());

    for i in 0..3u8 {
        let event = server.push_message(other, vec![i]);
        handle.deliver(server.envelope(vec![event])).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(applier.positions(other), vec![1, 2, 3]);

    handle.shutdown().await.unwrap();
}

// The ordering property: however delivery shuffles a contiguous run of one
// stream's events, the applied sequence is exactly the run in position
// order. Runs on the coordinator directly so proptest can drive it without
// a runtime.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_delivery_permutation_applies_in_order(
        len in 1usize..10,
        order in delivery_order_strategy(10),
    ) {
        let applier = Arc::new(RecordingApplier::new());
        let mut coordinator = SyncCoordinator::new(
            test_config(),
            Arc::clone(&applier),
            Arc::new(RecordingReporter::new()),
        );
        coordinator.install_baseline(STREAM, 0);
        let now = Instant::now();

        let events = contiguous_events(STREAM, 0, len as u64);
        let mut next_order = 101u64;
        for &index in order.iter().filter(|&&index| index < len) {
            let envelope = Envelope::new(next_order, 0, vec![events[index].clone()]);
            next_order += 1;
            coordinator.handle_envelope(envelope, now);
        }

        let expected: Vec<Position> = (1..=len as u64).collect();
        prop_assert_eq!(applier.positions(STREAM), expected);
        prop_assert_eq!(coordinator.confirmed(STREAM), Some(len as u64));
    }
}
