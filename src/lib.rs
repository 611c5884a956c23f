//! gambol - integration test playthroughs on ephemeral instances
//!
//! This library loads playthroughs, provisions instances through an
//! instance provider, runs acts in order and moves artifacts between the
//! host, a run-scoped cache and the instances.

pub mod artifact;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod common;
pub mod playthrough;
pub mod provider;
pub mod scheduler;

// Re-export commonly used types for tests
pub use common::{Error, Result};
