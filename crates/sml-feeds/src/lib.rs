//! sml-feeds — the file-tailing core.
//!
//! An [`InputSupervisor`] per declared path input and a [`ContainerAdapter`]
//! per docker-enabled input each own a live set of [`FileTailer`] workers.
//! Tailers read lines from their resume point, hand them through a cloned
//! filter chain to the shared output manager, and keep durable checkpoints
//! so a restart replays at most one line per file.

pub mod docker;
pub mod supervisor;
pub mod tailer;

pub use docker::{
    ContainerAdapter, ContainerMeta, ContainerRegistry, DockerRegistry, RegistrySnapshot,
};
pub use supervisor::{InputSupervisor, SupervisorHandle};
pub use tailer::{FileTailer, TailerHandle};
