//! The coordinator: routes events, owns all per-stream state, and is the
//! only caller of the injected applier.

use crate::backoff::BackoffScheduler;
use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::fetcher::CatchUp;
use crate::sequencer::{Admit, EnvelopeSequencer};
use crate::tracker::{Decision, PositionTracker};
use chatsync_protocol::{ChannelId, Envelope, Position, StreamId, UpdateEvent};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Applies accepted events to the local model.
///
/// Called exactly once per accepted event, in increasing position order per
/// stream. Implementations must not block; the call happens on the engine's
/// loop.
pub trait Applier: Send + Sync + 'static {
    /// Applies one event.
    fn apply(&self, stream: StreamId, event: &UpdateEvent);
}

impl<A: Applier + ?Sized> Applier for Arc<A> {
    fn apply(&self, stream: StreamId, event: &UpdateEvent) {
        (**self).apply(stream, event);
    }
}

/// Receives the upward signal that a stream's local state must be reloaded
/// wholesale because resynchronization cannot enumerate the gap.
pub trait GapReporter: Send + Sync + 'static {
    /// Reports an unrecoverable gap.
    fn unrecoverable_gap(&self, stream: StreamId);
}

impl<R: GapReporter + ?Sized> GapReporter for Arc<R> {
    fn unrecoverable_gap(&self, stream: StreamId) {
        (**self).unrecoverable_gap(stream);
    }
}

/// A difference fetch the driver should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Stream to catch up on.
    pub stream: StreamId,
    /// Confirmed position to fetch from.
    pub from: Position,
}

/// Counters describing the engine's work so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Envelopes handed to the engine.
    pub envelopes_received: u64,
    /// Envelopes buffered waiting for a predecessor.
    pub envelopes_buffered: u64,
    /// Envelopes dropped as duplicates.
    pub envelopes_duplicate: u64,
    /// Envelopes dropped as malformed.
    pub envelopes_malformed: u64,
    /// Events handed to the applier.
    pub events_applied: u64,
    /// Events buffered waiting for a gap to close.
    pub events_buffered: u64,
    /// Events dropped as duplicates.
    pub events_duplicate: u64,
    /// Difference fetches started.
    pub fetches_started: u64,
    /// Difference fetches that failed.
    pub fetch_failures: u64,
    /// Global resyncs forced by envelope loss or malformed envelopes.
    pub resyncs_forced: u64,
    /// Streams reported to the owner as unrecoverable.
    pub unrecoverable_gaps: u64,
    /// Channel streams evicted.
    pub channels_evicted: u64,
}

/// Per-stream state: the gap detector plus the held-back live events.
#[derive(Debug, Default)]
struct StreamSlot {
    tracker: PositionTracker,
    buffered: BTreeMap<Position, UpdateEvent>,
}

enum DeliverOutcome {
    Duplicate,
    Ignored,
    Applied(Vec<UpdateEvent>),
    Buffered { escalate_from: Option<Position> },
}

/// Owns the global stream, the per-channel stream map, the sequencer, and
/// the retry state; decides for every event whether it applies, buffers, or
/// drops, and which difference fetches to start.
///
/// The coordinator is a synchronous state machine: methods take the current
/// time and return the fetches the caller must start. Only one task may own
/// it, which is what makes the lock-free single-loop model sound.
pub struct SyncCoordinator<A: Applier, R: GapReporter> {
    config: EngineConfig,
    sequencer: EnvelopeSequencer,
    global: StreamSlot,
    channels: HashMap<ChannelId, StreamSlot>,
    backoff: BackoffScheduler,
    applier: A,
    reporter: R,
    stats: EngineStats,
}

impl<A: Applier, R: GapReporter> SyncCoordinator<A, R> {
    /// Creates a coordinator. Streams start uninitialized; supply known
    /// baselines via [`SyncCoordinator::install_baseline`].
    pub fn new(config: EngineConfig, applier: A, reporter: R) -> Self {
        let sequencer =
            EnvelopeSequencer::new(config.sequencer_wait, config.max_pending_envelopes);
        let backoff = BackoffScheduler::new(config.backoff.clone());
        Self {
            config,
            sequencer,
            global: StreamSlot::default(),
            channels: HashMap::new(),
            backoff,
            applier,
            reporter,
            stats: EngineStats::default(),
        }
    }

    /// Handles one envelope from the transport.
    pub fn handle_envelope(&mut self, envelope: Envelope, now: Instant) -> Vec<FetchRequest> {
        let mut out = Vec::new();
        self.stats.envelopes_received += 1;

        if let Err(error) = envelope.validate() {
            warn!(
                global_order = envelope.global_order,
                %error,
                "dropping malformed envelope, forcing global resync"
            );
            self.stats.envelopes_malformed += 1;
            self.force_global_resync(&mut out);
            return out;
        }

        match self.sequencer.accept(envelope, now) {
            Admit::Dispatch(chain) => {
                for envelope in chain {
                    self.dispatch_envelope(envelope, now, &mut out);
                }
            }
            Admit::Buffered => {
                self.stats.envelopes_buffered += 1;
                debug!(
                    pending = self.sequencer.pending_len(),
                    "envelope ahead of order, buffered"
                );
            }
            Admit::Duplicate => self.stats.envelopes_duplicate += 1,
            Admit::Overflow => {
                warn!("pending envelope bound hit, abandoning buffer and forcing global resync");
                self.sequencer.clear_pending();
                self.force_global_resync(&mut out);
            }
        }
        out
    }

    /// Handles the outcome of a difference fetch started earlier.
    ///
    /// Results for streams that have since been evicted, or that are no
    /// longer requesting, are stale and ignored.
    pub fn handle_fetch_result(
        &mut self,
        stream: StreamId,
        result: Result<CatchUp, FetchError>,
        now: Instant,
    ) -> Vec<FetchRequest> {
        let mut out = Vec::new();
        match self.slot_mut(stream) {
            Some(slot) if slot.tracker.is_requesting() => {}
            _ => {
                debug!(%stream, "ignoring stale difference result");
                return out;
            }
        }

        match result {
            Ok(catch_up) => {
                let Some(slot) = self.slot_mut(stream) else {
                    return out;
                };
                let floor = slot.tracker.confirmed();
                slot.tracker.adopt(catch_up.new_confirmed);
                slot.tracker.finish_request();
                let buffered = std::mem::take(&mut slot.buffered);
                self.backoff.on_success(stream);

                info!(
                    %stream,
                    from = floor,
                    to = catch_up.new_confirmed,
                    recovered = catch_up.events.len(),
                    "catch-up complete"
                );

                // Recovered events for this stream apply directly under the
                // new baseline; events for other streams go through their
                // own trackers like live ones.
                for event in catch_up.events {
                    if event.stream == stream {
                        if event.position > floor {
                            self.applier.apply(stream, &event);
                            self.stats.events_applied += 1;
                        }
                    } else {
                        let other = event.stream;
                        self.deliver(other, event, now, &mut out);
                    }
                }

                // Live events held back during the fetch; anything at or
                // below the baseline is covered by the catch-up.
                for (position, event) in buffered {
                    if position > catch_up.new_confirmed {
                        self.deliver(stream, event, now, &mut out);
                    }
                }

                if stream == StreamId::Global {
                    if let Some(order) = catch_up.envelope_order {
                        let chain = self.sequencer.adopt(order, now);
                        for envelope in chain {
                            self.dispatch_envelope(envelope, now, &mut out);
                        }
                    }
                }
            }
            Err(error) => {
                self.stats.fetch_failures += 1;
                if error.is_retryable() {
                    let at = self.backoff.schedule_retry(stream, now);
                    debug!(
                        %stream,
                        %error,
                        retry_in = ?(at - now),
                        "difference fetch failed, retry scheduled"
                    );
                } else {
                    warn!(%stream, %error, "unrecoverable gap, requesting reload");
                    self.stats.unrecoverable_gaps += 1;
                    self.reporter.unrecoverable_gap(stream);
                    self.teardown(stream);
                }
            }
        }
        out
    }

    /// Fires any timers that have elapsed: the sequencer's bounded wait,
    /// per-stream coalesce windows, and due backoff retries.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<FetchRequest> {
        let mut out = Vec::new();

        // When a global catch-up is already under way, its baseline will
        // settle the buffered envelopes; the expired wait needs no action.
        if self.sequencer.poll(now) && !self.global.tracker.is_requesting() {
            warn!(
                expected = ?self.sequencer.expected(),
                "predecessor envelope never arrived, forcing global resync"
            );
            self.sequencer.clear_pending();
            self.force_global_resync(&mut out);
        }

        let window = self.config.coalesce_window;
        let mut fired = Vec::new();
        if self
            .global
            .tracker
            .coalesce_deadline(window)
            .is_some_and(|deadline| now >= deadline)
        {
            fired.push(StreamId::Global);
        }
        for (id, slot) in &self.channels {
            if slot
                .tracker
                .coalesce_deadline(window)
                .is_some_and(|deadline| now >= deadline)
            {
                fired.push(StreamId::Channel(*id));
            }
        }
        for stream in fired {
            if let Some(slot) = self.slot_mut(stream) {
                if !slot.tracker.is_requesting() {
                    slot.tracker.begin_request();
                    let from = slot.tracker.confirmed();
                    debug!(%stream, from, "coalesce window elapsed, fetching difference");
                    self.stats.fetches_started += 1;
                    out.push(FetchRequest { stream, from });
                }
            }
        }

        for stream in self.backoff.take_due(now) {
            if let Some(slot) = self.slot_mut(stream) {
                if slot.tracker.is_requesting() {
                    let from = slot.tracker.confirmed();
                    debug!(%stream, from, "retrying difference fetch");
                    self.stats.fetches_started += 1;
                    out.push(FetchRequest { stream, from });
                }
            }
        }

        out
    }

    /// The earliest armed timer, for the driver's sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        let window = self.config.coalesce_window;
        let candidates = [
            self.sequencer.next_deadline(),
            self.global.tracker.coalesce_deadline(window),
            self.backoff.next_deadline(),
        ];
        let channel_deadlines = self
            .channels
            .values()
            .filter_map(|slot| slot.tracker.coalesce_deadline(window));
        candidates
            .into_iter()
            .flatten()
            .chain(channel_deadlines)
            .min()
    }

    /// Installs a stream's starting position, creating the channel slot if
    /// needed. Supplied by the owner at construction or after a reload.
    pub fn install_baseline(&mut self, stream: StreamId, position: Position) {
        match stream {
            StreamId::Global => self.global.tracker.adopt(position),
            StreamId::Channel(id) => {
                self.channels.entry(id).or_default().tracker.adopt(position);
            }
        }
    }

    /// Installs the envelope-order baseline and dispatches any buffered
    /// envelopes that continue from it.
    pub fn install_envelope_baseline(&mut self, order: u64, now: Instant) -> Vec<FetchRequest> {
        let mut out = Vec::new();
        let chain = self.sequencer.adopt(order, now);
        for envelope in chain {
            self.dispatch_envelope(envelope, now, &mut out);
        }
        out
    }

    /// Removes a channel stream: its buffered events are discarded and its
    /// timers cancelled. A difference result that later arrives for it is
    /// ignored.
    pub fn evict_channel(&mut self, id: ChannelId) {
        let stream = StreamId::Channel(id);
        if self.channels.remove(&id).is_some() {
            self.backoff.evict(stream);
            self.stats.channels_evicted += 1;
            debug!(%stream, "channel evicted");
        }
    }

    /// Work counters so far.
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// A stream's confirmed position, once initialized.
    pub fn confirmed(&self, stream: StreamId) -> Option<Position> {
        self.slot_ref(stream)
            .filter(|slot| slot.tracker.is_initialized())
            .map(|slot| slot.tracker.confirmed())
    }

    /// True while the stream has a difference fetch outstanding.
    pub fn is_requesting(&self, stream: StreamId) -> bool {
        self.slot_ref(stream)
            .is_some_and(|slot| slot.tracker.is_requesting())
    }

    /// Number of live channel streams.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn dispatch_envelope(&mut self, envelope: Envelope, now: Instant, out: &mut Vec<FetchRequest>) {
        for event in envelope.events {
            let stream = event.stream;
            self.deliver(stream, event, now, out);
        }
    }

    fn deliver(
        &mut self,
        stream: StreamId,
        event: UpdateEvent,
        now: Instant,
        out: &mut Vec<FetchRequest>,
    ) {
        let max_buffered = self.config.max_buffered_events;
        let outcome = {
            let slot = match stream {
                StreamId::Global => &mut self.global,
                StreamId::Channel(id) => self.channels.entry(id).or_default(),
            };

            if event.weight > 0 && slot.buffered.contains_key(&event.position) {
                DeliverOutcome::Duplicate
            } else {
                match slot.tracker.observe(event.position, event.weight, now) {
                    Decision::AlreadyApplied => DeliverOutcome::Duplicate,
                    Decision::Apply => {
                        if event.weight == 0 {
                            // Probes bypass the buffer; they carry no
                            // counter units and nothing waits on them.
                            DeliverOutcome::Applied(vec![event])
                        } else {
                            slot.buffered.insert(event.position, event);
                            let ready = std::mem::take(&mut slot.buffered);
                            DeliverOutcome::Applied(ready.into_values().collect())
                        }
                    }
                    Decision::Buffer if event.weight == 0 => {
                        // A held-back probe carries nothing to replay;
                        // buffering one could shadow a real event at the
                        // same position.
                        DeliverOutcome::Ignored
                    }
                    Decision::Buffer => {
                        slot.buffered.insert(event.position, event);
                        let over = slot.buffered.len() > max_buffered
                            && !slot.tracker.is_requesting();
                        if over {
                            slot.tracker.begin_request();
                            DeliverOutcome::Buffered {
                                escalate_from: Some(slot.tracker.confirmed()),
                            }
                        } else {
                            DeliverOutcome::Buffered {
                                escalate_from: None,
                            }
                        }
                    }
                }
            }
        };

        match outcome {
            DeliverOutcome::Duplicate => self.stats.events_duplicate += 1,
            DeliverOutcome::Ignored => {}
            DeliverOutcome::Applied(events) => {
                for event in events {
                    self.applier.apply(stream, &event);
                    self.stats.events_applied += 1;
                }
            }
            DeliverOutcome::Buffered { escalate_from } => {
                self.stats.events_buffered += 1;
                if let Some(from) = escalate_from {
                    warn!(%stream, from, "buffered event bound hit, fetching difference early");
                    self.stats.fetches_started += 1;
                    out.push(FetchRequest { stream, from });
                }
            }
        }
    }

    fn force_global_resync(&mut self, out: &mut Vec<FetchRequest>) {
        if self.global.tracker.is_requesting() {
            return;
        }
        self.global.tracker.begin_request();
        self.stats.resyncs_forced += 1;
        self.stats.fetches_started += 1;
        out.push(FetchRequest {
            stream: StreamId::Global,
            from: self.global.tracker.confirmed(),
        });
    }

    fn teardown(&mut self, stream: StreamId) {
        self.backoff.evict(stream);
        match stream {
            StreamId::Global => {
                self.global = StreamSlot::default();
                self.sequencer.reset();
            }
            StreamId::Channel(id) => {
                self.channels.remove(&id);
            }
        }
    }

    fn slot_ref(&self, stream: StreamId) -> Option<&StreamSlot> {
        match stream {
            StreamId::Global => Some(&self.global),
            StreamId::Channel(id) => self.channels.get(&id),
        }
    }

    fn slot_mut(&mut self, stream: StreamId) -> Option<&mut StreamSlot> {
        match stream {
            StreamId::Global => Some(&mut self.global),
            StreamId::Channel(id) => self.channels.get_mut(&id),
        }
    }
}

/// An applier that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingApplier {
    applied: Mutex<Vec<(StreamId, UpdateEvent)>>,
}

impl RecordingApplier {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything applied so far, in call order.
    pub fn applied(&self) -> Vec<(StreamId, UpdateEvent)> {
        self.applied.lock().clone()
    }

    /// The positions applied for one stream, in call order.
    pub fn positions(&self, stream: StreamId) -> Vec<Position> {
        self.applied
            .lock()
            .iter()
            .filter(|(applied_stream, _)| *applied_stream == stream)
            .map(|(_, event)| event.position)
            .collect()
    }

    /// Number of applied events.
    pub fn len(&self) -> usize {
        self.applied.lock().len()
    }

    /// True when nothing has been applied.
    pub fn is_empty(&self) -> bool {
        self.applied.lock().is_empty()
    }
}

impl Applier for RecordingApplier {
    fn apply(&self, stream: StreamId, event: &UpdateEvent) {
        self.applied.lock().push((stream, event.clone()));
    }
}

/// A gap reporter that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    gaps: Mutex<Vec<StreamId>>,
}

impl RecordingReporter {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams reported unrecoverable, in call order.
    pub fn gaps(&self) -> Vec<StreamId> {
        self.gaps.lock().clone()
    }
}

impl GapReporter for RecordingReporter {
    fn unrecoverable_gap(&self, stream: StreamId) {
        self.gaps.lock().push(stream);
    }
}
