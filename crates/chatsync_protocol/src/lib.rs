//! # Chatsync Protocol
//!
//! Wire-level types for the update-stream synchronization protocol.
//!
//! This crate provides:
//! - Stream identifiers (the global stream and per-channel streams)
//! - Update events with per-stream positions and weights
//! - Envelopes (atomically-delivered event batches with a global order)
//! - Difference (catch-up) request/response messages
//! - CBOR encode/decode helpers
//!
//! ## Counter spaces
//!
//! Two independent kinds of counters exist on the wire:
//!
//! - Every envelope carries a `global_order`, a single counter that tells the
//!   client whether it has received every envelope the server sent.
//! - Every event carries a `position` in its own stream's counter space,
//!   which tells the client whether it has received every change for that
//!   stream. The global stream and each channel count independently.
//!
//! Losing an envelope and losing a channel's change are different failures
//! and are repaired by different difference fetches; the types here keep the
//! two spaces separate on purpose.
//!
//! All types in this crate are plain data. Gap detection, buffering, and
//! resynchronization live in `chatsync_engine`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod difference;
mod envelope;
mod event;
mod stream;

pub use codec::{from_cbor, to_cbor, CodecError};
pub use difference::{DifferenceRequest, DifferenceResponse};
pub use envelope::{Envelope, EnvelopeError, MAX_EVENTS_PER_ENVELOPE, MAX_PAYLOAD_BYTES};
pub use event::{EventKind, UpdateEvent};
pub use stream::{ChannelId, Position, StreamId};
