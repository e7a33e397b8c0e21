//! Shared utilities for drover
//!
//! This crate provides:
//! - ID types (EntityType, EntityName, TickRunId)
//! - Error types
//! - Time helpers (wall clock, unix timestamps)
//! - Per-name locks for serializing work on one entity
//! - Default paths for data and diagnostics

mod error;
mod ids;
mod locks;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use locks::*;
pub use paths::*;
pub use time::*;
