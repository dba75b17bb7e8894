#![allow(dead_code)]
//! Shared test utilities for sml integration harnesses.
//!
//! Import everything you need via `mod common; use common::*;` at the top of
//! each harness file. Helpers poll with short sleeps rather than hooking the
//! runtime clock, because the code under test does real file I/O.

pub mod builders;
pub mod fake_docker_api;
pub mod fixtures;
pub mod memory_sink;

pub use builders::*;
pub use fixtures::*;
pub use memory_sink::*;
