//! # Chatsync Testkit
//!
//! Test utilities for chatsync.
//!
//! This crate provides:
//! - Event and envelope fixture builders
//! - An in-memory authoritative stream server that emits envelopes and
//!   serves difference requests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use chatsync_testkit::prelude::*;
//! use chatsync_protocol::{ChannelId, StreamId};
//!
//! let server = StreamServer::new();
//! let stream = StreamId::Channel(ChannelId(1));
//! let event = server.push_message(stream, b"hello".to_vec());
//! let envelope = server.envelope(vec![event]);
//! assert_eq!(envelope.global_order, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use fixtures::*;
pub use generators::*;
pub use server::*;
