//! Error types for machines and drivers

use drover_store::StoreError;
use drover_util::{DroverError, EntityName};
use std::any::Any;
use thiserror::Error;

/// Failure inside state-machine code
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transition chain exceeded {depth} steps at state '{state}'")]
    TransitionLoop { state: String, depth: usize },

    #[error("{0}")]
    Failed(String),
}

impl MachineError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

pub type MachineResult<T> = Result<T, MachineError>;

/// Errors surfaced by a driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    InvalidName(#[from] DroverError),

    #[error("Machine '{entity}' failed: {source}")]
    Machine {
        entity: EntityName,
        #[source]
        source: MachineError,
    },

    #[error("Machine '{entity}' panicked: {message}")]
    Panicked { entity: EntityName, message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Poll hook failed: {0}")]
    Hook(String),

    #[error("Driver already started")]
    AlreadyStarted,

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DriverError {
    pub fn machine(entity: &EntityName, source: MachineError) -> Self {
        Self::Machine {
            entity: entity.clone(),
            source,
        }
    }

    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
