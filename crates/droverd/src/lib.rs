//! Building blocks of the drover daemon
//!
//! - [`TableMachine`]: a state table read from a `[[machines]]` config entry
//! - [`Daemon`]: one driver per configured entity type over a shared store

mod daemon;
mod table;

pub use daemon::*;
pub use table::*;
