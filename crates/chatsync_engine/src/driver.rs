//! The async driver: one loop task owning the coordinator.

use crate::config::EngineConfig;
use crate::coordinator::{Applier, FetchRequest, GapReporter, SyncCoordinator};
use crate::error::{EngineError, EngineResult, FetchError};
use crate::fetcher::{CatchUp, DifferenceFetcher};
use crate::transport::DifferenceTransport;
use chatsync_protocol::{ChannelId, Envelope, Position, StreamId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

enum Command {
    Envelope(Envelope),
    EvictChannel(ChannelId),
    InstallBaseline(StreamId, Position),
    InstallEnvelopeBaseline(u64),
    Shutdown,
}

/// Clonable handle for feeding the engine.
///
/// The transport pushes envelopes through [`EngineHandle::deliver`]; the
/// owning application uses the remaining methods to seed baselines and to
/// retire channels the user has left.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Delivers one envelope from the transport.
    pub async fn deliver(&self, envelope: Envelope) -> EngineResult<()> {
        self.send(Command::Envelope(envelope)).await
    }

    /// Removes a channel stream and cancels its pending work.
    pub async fn evict_channel(&self, id: ChannelId) -> EngineResult<()> {
        self.send(Command::EvictChannel(id)).await
    }

    /// Installs a stream's starting position.
    pub async fn install_baseline(&self, stream: StreamId, position: Position) -> EngineResult<()> {
        self.send(Command::InstallBaseline(stream, position)).await
    }

    /// Installs the envelope-order starting value.
    pub async fn install_envelope_baseline(&self, order: u64) -> EngineResult<()> {
        self.send(Command::InstallEnvelopeBaseline(order)).await
    }

    /// Stops the engine's loop.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> EngineResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::NotRunning)
    }
}

/// The engine: the coordinator plus the loop that drives it.
///
/// Everything stateful runs on the loop task; difference fetches are the
/// only spawned work, and their results come back through the loop. While a
/// fetch is in flight the loop keeps serving every other stream.
pub struct SyncEngine<T: DifferenceTransport, A: Applier, R: GapReporter> {
    coordinator: SyncCoordinator<A, R>,
    fetcher: DifferenceFetcher<T>,
    commands: mpsc::Receiver<Command>,
    fetches: JoinSet<(StreamId, Result<CatchUp, FetchError>)>,
}

impl<T: DifferenceTransport, A: Applier, R: GapReporter> SyncEngine<T, A, R> {
    /// Creates an engine and its handle.
    pub fn new(
        config: EngineConfig,
        transport: Arc<T>,
        applier: A,
        reporter: R,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(config.command_queue_depth.max(1));
        let fetcher = DifferenceFetcher::new(transport, &config);
        let coordinator = SyncCoordinator::new(config, applier, reporter);
        let engine = Self {
            coordinator,
            fetcher,
            commands: rx,
            fetches: JoinSet::new(),
        };
        (engine, EngineHandle { commands: tx })
    }

    /// Runs the loop until [`EngineHandle::shutdown`] or until every handle
    /// is dropped.
    pub async fn run(mut self) {
        loop {
            let deadline = self.coordinator.next_deadline();
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None | Some(Command::Shutdown) => {
                            debug!("engine loop stopping");
                            break;
                        }
                        Some(Command::Envelope(envelope)) => {
                            let requests =
                                self.coordinator.handle_envelope(envelope, Instant::now());
                            self.spawn_fetches(requests);
                        }
                        Some(Command::EvictChannel(id)) => {
                            self.coordinator.evict_channel(id);
                        }
                        Some(Command::InstallBaseline(stream, position)) => {
                            self.coordinator.install_baseline(stream, position);
                        }
                        Some(Command::InstallEnvelopeBaseline(order)) => {
                            let requests = self
                                .coordinator
                                .install_envelope_baseline(order, Instant::now());
                            self.spawn_fetches(requests);
                        }
                    }
                }
                Some(joined) = self.fetches.join_next() => {
                    match joined {
                        Ok((stream, result)) => {
                            let requests = self
                                .coordinator
                                .handle_fetch_result(stream, result, Instant::now());
                            self.spawn_fetches(requests);
                        }
                        Err(join_error) => {
                            warn!(%join_error, "difference fetch task failed");
                        }
                    }
                }
                () = sleep_until_opt(deadline) => {
                    let requests = self.coordinator.poll_timers(Instant::now());
                    self.spawn_fetches(requests);
                }
            }
        }
    }

    fn spawn_fetches(&mut self, requests: Vec<FetchRequest>) {
        for request in requests {
            let fetcher = self.fetcher.clone();
            self.fetches.spawn(async move {
                let result = fetcher.run(request.stream, request.from).await;
                (request.stream, result)
            });
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
