//! Resolving entity names to machines and dispatching calls on them

use drover_store::Store;
use drover_util::{EntityName, EntityType};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::{
    ActivityBoard, DriverError, DriverResult, DriverStats, EntityLog, EventArgs, LogBridge,
    MachineContext, MachineFactory, StateMachine, TickPhase, error::panic_message,
};

/// Builds fresh machines for names and invokes them
pub struct Dispatcher<F: MachineFactory> {
    factory: Arc<F>,
    store: Arc<dyn Store>,
    bridge: Arc<LogBridge>,
    stats: Arc<DriverStats>,
}

impl<F: MachineFactory> Dispatcher<F> {
    pub fn new(
        factory: Arc<F>,
        store: Arc<dyn Store>,
        bridge: Arc<LogBridge>,
        stats: Arc<DriverStats>,
    ) -> Self {
        Self {
            factory,
            store,
            bridge,
            stats,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        self.factory.entity_type()
    }

    /// Build a fresh machine for `name`. Nothing is cached; whether the
    /// entity actually exists is for the machine to find out.
    pub fn resolve(&self, name: &EntityName) -> DriverResult<F::Machine> {
        name.validate()?;
        let entity_type = self.factory.entity_type().clone();
        let log = EntityLog::new(entity_type.clone(), name.clone(), self.bridge.clone());
        Ok(self.factory.build(MachineContext {
            entity_type,
            entity_name: name.clone(),
            store: self.store.clone(),
            log,
        }))
    }

    /// Deliver an event. Failures go back to the caller.
    pub fn handle_event(&self, name: &EntityName, event: &str, args: &EventArgs) -> DriverResult<()> {
        debug!(entity_type = %self.entity_type(), entity = %name, event, "Handling event");
        let machine = self.resolve(name)?;
        machine
            .handle_event(event, args)
            .map_err(|e| DriverError::machine(name, e))
    }

    /// Deliver a timeout. Failures (including panics in machine code) are
    /// logged and suppressed so one entity cannot hold up the others.
    /// Returns whether the handler succeeded.
    pub fn handle_timeout(&self, name: &EntityName) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| -> DriverResult<()> {
            let machine = self.resolve(name)?;
            machine
                .handle_timeout()
                .map_err(|e| DriverError::machine(name, e))
        }))
        .unwrap_or_else(|payload| {
            Err(DriverError::Panicked {
                entity: name.clone(),
                message: panic_message(&*payload),
            })
        });

        match outcome {
            Ok(()) => {
                self.stats.timeout_handled();
                true
            }
            Err(e) => {
                self.stats.timeout_failed();
                error!(
                    entity_type = %self.entity_type(),
                    entity = %name,
                    error = %e,
                    "(ignored) error while handling timeout"
                );
                false
            }
        }
    }

    /// Compare-and-swap on the entity's state. `Ok(false)` when the guard
    /// fails; errors only when the machine could not be consulted at all.
    pub fn conditional_transition(
        &self,
        name: &EntityName,
        old_state: &str,
        new_state: &str,
    ) -> DriverResult<bool> {
        let machine = self.resolve(name)?;
        machine
            .conditional_transition(old_state, new_state)
            .map_err(|e| DriverError::machine(name, e))
    }

    /// Handle a timeout on every entity storage reports as due right now,
    /// in the order storage returns them. Returns how many were handled
    /// successfully.
    pub fn poll_for_timeouts(&self, activity: &ActivityBoard) -> DriverResult<usize> {
        activity.set_phase(TickPhase::ListingTimeouts);
        let names = self
            .store
            .list_timed_out(self.entity_type(), drover_util::now_utc())?;

        let mut handled = 0;
        for name in &names {
            info!(entity_type = %self.entity_type(), entity = %name, "handling timeout on {name}");
            activity.set_phase(TickPhase::HandlingTimeout(name.clone()));
            if self.handle_timeout(name) {
                handled += 1;
            }
        }
        Ok(handled)
    }
}

impl<F: MachineFactory> fmt::Debug for Dispatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("entity_type", self.entity_type())
            .finish_non_exhaustive()
    }
}
