//! Common utilities shared across the crate

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
