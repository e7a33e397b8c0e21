//! Machines whose state lives in storage, described by a state table
//!
//! An entity kind implements [`StateTable`]: per-state entry/exit hooks,
//! event handling and timeout handling. [`StoredMachine`] supplies the
//! mechanics around it: reading the current state, moving between states
//! with persisted deadlines, counters, and per-name locking so operations on
//! one entity never interleave within the process.

use drover_store::Store;
use drover_util::{EntityName, EntityType, NameLocks, deadline_after, now_utc};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    EntityLog, EventArgs, MachineContext, MachineError, MachineFactory, MachineResult,
    StateMachine,
};

/// Longest chain of transitions a single operation may make
pub const MAX_TRANSITION_DEPTH: usize = 32;

/// Whether a state table acted on an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Handled,
    Ignored,
}

/// The behavior of one entity kind, keyed by state name
pub trait StateTable: Sized + Send + Sync + 'static {
    /// How long an entity may stay in `state` before timing out
    fn timeout_for(&self, state: &str) -> Option<Duration>;

    /// The machine has just entered `t.state()`
    fn on_entry(&self, _t: &mut Transition<'_, Self>) -> MachineResult<()> {
        Ok(())
    }

    /// The machine is about to leave `t.state()`
    fn on_exit(&self, _t: &mut Transition<'_, Self>) -> MachineResult<()> {
        Ok(())
    }

    fn on_event(
        &self,
        t: &mut Transition<'_, Self>,
        event: &str,
        args: &EventArgs,
    ) -> MachineResult<EventOutcome>;

    /// The current state has timed out. By default the timeout is cleared
    /// so it does not fire again.
    fn on_timeout(&self, t: &mut Transition<'_, Self>) -> MachineResult<()> {
        t.drop_unhandled_timeout()
    }
}

/// Handle given to table hooks while an operation holds the entity
pub struct Transition<'a, T: StateTable> {
    machine: &'a StoredMachine<T>,
    state: String,
    steps: usize,
}

impl<'a, T: StateTable> Transition<'a, T> {
    fn new(machine: &'a StoredMachine<T>, state: String) -> Self {
        Self {
            machine,
            state,
            steps: 0,
        }
    }

    /// The state the machine is currently in
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn name(&self) -> &EntityName {
        &self.machine.ctx.entity_name
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.machine.ctx.entity_type
    }

    pub fn log(&self) -> &EntityLog {
        &self.machine.ctx.log
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.machine.ctx.store
    }

    /// Leave the current state and enter `new_state`. Re-entering the same
    /// state runs both hooks and restarts its timeout.
    pub fn goto(&mut self, new_state: &str) -> MachineResult<()> {
        if self.steps >= MAX_TRANSITION_DEPTH {
            return Err(MachineError::TransitionLoop {
                state: new_state.to_string(),
                depth: self.steps,
            });
        }
        self.steps += 1;

        let machine = self.machine;
        machine.table.on_exit(self)?;
        let deadline = self.deadline_for(new_state);
        self.enter(new_state, |ctx| {
            ctx.store
                .set_state(&ctx.entity_type, &ctx.entity_name, new_state, deadline)?;
            Ok(true)
        })?;
        Ok(())
    }

    /// Keep the current state but drop its deadline
    pub fn clear_timeout(&mut self) -> MachineResult<()> {
        let ctx = &self.machine.ctx;
        ctx.store
            .set_state(&ctx.entity_type, &ctx.entity_name, &self.state, None)?;
        Ok(())
    }

    /// Warn that the current state has no timeout handling and clear the
    /// deadline so it does not fire again
    pub fn drop_unhandled_timeout(&mut self) -> MachineResult<()> {
        self.log().warn(format!(
            "state {} encountered a timeout but has no timeout method",
            self.state
        ));
        self.clear_timeout()
    }

    pub fn counter(&self, counter: &str) -> MachineResult<u32> {
        let ctx = &self.machine.ctx;
        let counters = ctx.store.get_counters(&ctx.entity_type, &ctx.entity_name)?;
        Ok(counters.get(counter).copied().unwrap_or(0))
    }

    /// Add one to `counter` and return its new value
    pub fn increment_counter(&mut self, counter: &str) -> MachineResult<u32> {
        let ctx = &self.machine.ctx;
        let mut counters = ctx.store.get_counters(&ctx.entity_type, &ctx.entity_name)?;
        let value = counters.entry(counter.to_string()).or_insert(0);
        *value = value.saturating_add(1);
        let value = *value;
        ctx.store
            .set_counters(&ctx.entity_type, &ctx.entity_name, &counters)?;
        Ok(value)
    }

    pub fn clear_counter(&mut self, counter: &str) -> MachineResult<()> {
        let ctx = &self.machine.ctx;
        let mut counters = ctx.store.get_counters(&ctx.entity_type, &ctx.entity_name)?;
        if counters.remove(counter).is_some() {
            ctx.store
                .set_counters(&ctx.entity_type, &ctx.entity_name, &counters)?;
        }
        Ok(())
    }

    pub fn clear_counters(&mut self) -> MachineResult<()> {
        let ctx = &self.machine.ctx;
        ctx.store
            .set_counters(&ctx.entity_type, &ctx.entity_name, &Default::default())?;
        Ok(())
    }

    fn deadline_for(&self, state: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.machine
            .table
            .timeout_for(state)
            .map(|timeout| deadline_after(now_utc(), timeout))
    }

    /// Persist the move with `write`, then log it and run the entry hook.
    /// Returns false without entering if `write` reports it did not happen.
    fn enter(
        &mut self,
        new_state: &str,
        write: impl FnOnce(&MachineContext) -> MachineResult<bool>,
    ) -> MachineResult<bool> {
        let machine = self.machine;
        if !write(&machine.ctx)? {
            return Ok(false);
        }
        if self.state != new_state {
            self.log().info(format!("entering state {new_state}"));
        }
        self.state = new_state.to_string();

        machine.table.on_entry(self)?;
        Ok(true)
    }
}

/// A [`StateMachine`] over state held in storage, driven by a [`StateTable`]
pub struct StoredMachine<T: StateTable> {
    table: Arc<T>,
    ctx: MachineContext,
    locks: Arc<NameLocks>,
}

impl<T: StateTable> StoredMachine<T> {
    pub fn new(table: Arc<T>, ctx: MachineContext, locks: Arc<NameLocks>) -> Self {
        Self { table, ctx, locks }
    }

    pub fn context(&self) -> &MachineContext {
        &self.ctx
    }

    pub fn read_state(&self) -> MachineResult<String> {
        Ok(self
            .ctx
            .store
            .get_state(&self.ctx.entity_type, &self.ctx.entity_name)?)
    }

    /// Run `f` holding this entity's lock, with the state freshly loaded
    fn with_transition<R>(
        &self,
        f: impl FnOnce(&mut Transition<'_, T>) -> MachineResult<R>,
    ) -> MachineResult<R> {
        let _guard = self.locks.acquire(self.ctx.entity_name.as_str());
        let mut t = Transition::new(self, self.read_state()?);
        f(&mut t)
    }
}

impl<T: StateTable> StateMachine for StoredMachine<T> {
    fn handle_event(&self, event: &str, args: &EventArgs) -> MachineResult<()> {
        self.with_transition(|t| {
            let state = t.state().to_string();
            if self.table.on_event(t, event, args)? == EventOutcome::Ignored {
                t.log()
                    .warn(format!("ignored event {event} in state {state}"));
            }
            Ok(())
        })
    }

    fn handle_timeout(&self) -> MachineResult<()> {
        self.with_transition(|t| self.table.on_timeout(t))
    }

    /// The in-process lock orders local callers; the storage compare-and-set
    /// catches anyone else who moved the entity since it was read. Exit and
    /// entry hooks run only once the move is committed.
    fn conditional_transition(&self, old_state: &str, new_state: &str) -> MachineResult<bool> {
        self.with_transition(|t| {
            if t.state() != old_state {
                return Ok(false);
            }
            t.steps += 1;

            let deadline = t.deadline_for(new_state);
            let ctx = &self.ctx;
            if !ctx.store.compare_and_set_state(
                &ctx.entity_type,
                &ctx.entity_name,
                old_state,
                new_state,
                deadline,
            )? {
                return Ok(false);
            }

            self.table.on_exit(t)?;
            t.enter(new_state, |_| Ok(true))
        })
    }
}

/// Builds [`StoredMachine`]s for one entity type, sharing one lock set
pub struct TableFactory<T: StateTable> {
    entity_type: EntityType,
    table: Arc<T>,
    locks: Arc<NameLocks>,
}

impl<T: StateTable> TableFactory<T> {
    pub fn new(entity_type: impl Into<EntityType>, table: T) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: Arc::new(table),
            locks: Arc::new(NameLocks::new()),
        }
    }

    pub fn table(&self) -> &T {
        &self.table
    }
}

impl<T: StateTable> MachineFactory for TableFactory<T> {
    type Machine = StoredMachine<T>;

    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn build(&self, ctx: MachineContext) -> StoredMachine<T> {
        StoredMachine::new(self.table.clone(), ctx, self.locks.clone())
    }
}
