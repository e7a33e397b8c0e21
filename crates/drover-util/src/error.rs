//! Error types for drover

use thiserror::Error;

/// Shared error type for drover utilities
#[derive(Debug, Error)]
pub enum DroverError {
    #[error("Invalid name: {0}")]
    InvalidName(String),
}

impl DroverError {
    pub fn invalid_name(msg: impl Into<String>) -> Self {
        Self::InvalidName(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DroverError>;
