//! rollgate-core: shared types and configuration for rollgate.
//!
//! Holds the data model every pipeline stage passes along (generation
//! snapshot, configured-object index, changed set, stage failures,
//! outcomes) and the immutable [`RolloutConfig`] threaded through each
//! component's entry point.

pub mod config;
pub mod error;
pub mod types;

pub use config::{RolloutConfig, Timeout, parse_duration};
pub use error::{ConfigError, ItemError};
pub use types::*;
