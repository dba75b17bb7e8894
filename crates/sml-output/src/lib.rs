//! sml-output — the downstream half of the pipeline.
//!
//! Raw lines enter through a cloneable [`FilterChain`], come out as
//! [`Record`](sml_core::Record)s, and pass through the shared
//! [`OutputManager`] which enriches, deduplicates, truncates, and fans each
//! record out to every configured [`Sink`].

pub mod digest;
pub mod filter;
pub mod level;
pub mod manager;
pub mod sink;

pub use filter::{Filter, FilterChain, JsonFilter, MessageFilter, Verdict};
pub use level::{ConfiguredLevels, LevelPolicy};
pub use manager::OutputManager;
pub use sink::{JsonlSink, Sink};
