//! State-machine driver for drover
//!
//! This crate is the heart of drover, containing:
//! - The state-machine capability set and the resolver/dispatcher over it
//! - The tick executor (liveness marker, timeout polling, extension hook)
//! - The scheduler loop with overrun detection and backoff
//! - Overrun diagnostics snapshots
//! - The log bridge routing per-entity records into storage
//! - A storage-backed machine framework entity kinds are built on

mod backoff;
mod diagnostics;
mod dispatcher;
mod error;
mod log_bridge;
mod machine;
mod scheduler;
mod stacks;
mod stats;
mod stored;
mod tick;

pub use backoff::*;
pub use diagnostics::*;
pub use dispatcher::*;
pub use error::*;
pub use log_bridge::*;
pub use machine::*;
pub use scheduler::*;
pub use stacks::*;
pub use stats::*;
pub use stored::*;
pub use tick::*;
