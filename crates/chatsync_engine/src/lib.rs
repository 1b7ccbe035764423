//! # Chatsync Engine
//!
//! The update-stream synchronization engine: consumes the server's live
//! stream of change notifications, detects lost or reordered deliveries,
//! and drives incremental difference (catch-up) fetches so that every
//! change reaches the local model exactly once and in per-stream order.
//!
//! This crate provides:
//! - Per-stream gap detection ([`PositionTracker`])
//! - Envelope reordering with a bounded wait ([`EnvelopeSequencer`])
//! - Chained difference fetching ([`DifferenceFetcher`])
//! - Per-stream capped exponential retry ([`BackoffScheduler`])
//! - The coordinator tying them together ([`SyncCoordinator`])
//! - An async driver and handle ([`SyncEngine`], [`EngineHandle`])
//!
//! ## Architecture
//!
//! All engine state lives in [`SyncCoordinator`], a synchronous state
//! machine whose methods take the current time and return the difference
//! fetches to start. Only [`SyncEngine`]'s single loop task touches the
//! coordinator, so no state is shared and nothing locks. Fetches run as
//! spawned tasks; their results come back through the same loop.
//!
//! ## Key invariants
//!
//! - Per stream, applied events are strictly increasing by position
//! - An event is applied at most once; duplicates are dropped silently
//! - While a stream has a difference fetch outstanding, its live events
//!   buffer rather than apply
//! - One struggling stream never delays any other stream

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod config;
mod coordinator;
mod driver;
mod error;
mod fetcher;
mod sequencer;
mod tracker;
mod transport;

pub use backoff::BackoffScheduler;
pub use config::{BackoffConfig, EngineConfig};
pub use coordinator::{
    Applier, EngineStats, FetchRequest, GapReporter, RecordingApplier, RecordingReporter,
    SyncCoordinator,
};
pub use driver::{EngineHandle, SyncEngine};
pub use error::{EngineError, EngineResult, FetchError};
pub use fetcher::{CatchUp, DifferenceFetcher};
pub use sequencer::{Admit, EnvelopeSequencer, SequencerPhase};
pub use tracker::{Decision, PositionTracker};
pub use transport::{DifferenceTransport, MockTransport};
