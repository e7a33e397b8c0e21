//! Persistence layer for drover
//!
//! Provides:
//! - Entity state with an optional timeout deadline
//! - Compare-and-set state transitions
//! - Per-entity counters
//! - Timed-out entity queries
//! - Per-entity log storage

mod log;
mod sqlite;
mod traits;

pub use log::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    InvalidName(#[from] drover_util::DroverError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
