//! sml — Ship My Logs
//!
//! A headless log-shipping agent: supervisors discover files from glob
//! patterns or the container registry, per-file tailers read them with
//! durable resume points, and the shared output manager enriches and fans
//! records out to the configured sinks.
//!
//! # Architecture
//!
//! ```text
//! Supervisor / ContainerAdapter
//!         │ spawns
//!         ▼
//!     FileTailer ──► FilterChain ──► OutputManager ──► Sinks
//!         │
//!         └──► CheckpointStore
//! ```
//!
//! Every worker is a `tokio` task hanging off a cancellation token, so
//! shutdown is one cancel followed by an orderly join and a sink drain.

pub mod agent;

pub use agent::Agent;
