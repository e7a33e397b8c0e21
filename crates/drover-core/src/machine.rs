//! The state-machine capability set and how machines are built

use drover_store::Store;
use drover_util::{EntityName, EntityType};
use std::fmt;
use std::sync::Arc;

use crate::{EntityLog, MachineResult};

/// Arguments accompanying an event, as received from the caller
pub type EventArgs = serde_json::Value;

/// What every entity kind must support.
///
/// A machine is a short-lived façade over state held in storage: the driver
/// builds a fresh one for every call and drops it afterwards, so
/// implementations must not rely on anything surviving between calls.
pub trait StateMachine {
    /// Act on a named event
    fn handle_event(&self, event: &str, args: &EventArgs) -> MachineResult<()>;

    /// The current state has timed out
    fn handle_timeout(&self) -> MachineResult<()>;

    /// Move to `new_state` only if currently in `old_state`. `Ok(false)`
    /// means the guard did not hold (wrong state, already moved, lost race).
    fn conditional_transition(&self, old_state: &str, new_state: &str) -> MachineResult<bool>;
}

/// Everything a machine gets to work with
#[derive(Clone)]
pub struct MachineContext {
    pub entity_type: EntityType,
    pub entity_name: EntityName,
    pub store: Arc<dyn Store>,
    pub log: EntityLog,
}

impl fmt::Debug for MachineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineContext")
            .field("entity_type", &self.entity_type)
            .field("entity_name", &self.entity_name)
            .finish_non_exhaustive()
    }
}

/// Builds machines of one entity type.
///
/// Each driver is wired to exactly one factory, and so to one entity type.
pub trait MachineFactory: Send + Sync + 'static {
    type Machine: StateMachine;

    fn entity_type(&self) -> &EntityType;

    fn build(&self, ctx: MachineContext) -> Self::Machine;
}
