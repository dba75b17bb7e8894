//! sml-core — Ship My Logs core library.
//!
//! Shared building blocks for the tailing core and the output pipeline: the
//! declared-input model, the provenance marker attached to every shipped
//! line, physical file identity, and durable checkpoints.
//!
//! # Architecture
//!
//! ```text
//! Supervisor ──► Tailer ──► FilterChain ──► OutputManager ──► Sinks
//!                  │
//!                  └──► CheckpointStore
//! ```
//!
//! Everything above the checkpoint store lives in `sml-feeds` and
//! `sml-output`; this crate holds the types they exchange.

pub mod checkpoint;
pub mod config;
pub mod identity;
pub mod types;

pub use checkpoint::{CheckpointCursor, CheckpointStore};
pub use identity::FileIdentity;
pub use types::{InputDescriptor, InputMarker, Record};
