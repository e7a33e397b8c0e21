//! Store trait definitions

use chrono::{DateTime, Utc};
use drover_util::{EntityName, EntityType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{LogEntry, LogQuery, LogSource, StoreResult};

/// Named counters kept alongside an entity's state
pub type Counters = BTreeMap<String, u32>;

/// Persisted state of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub name: EntityName,
    pub state: String,

    /// When the current state times out; `None` never times out
    pub state_timeout: Option<DateTime<Utc>>,

    pub counters: Counters,
}

/// Main store trait.
///
/// Implementations synchronize internally; drivers call them from their tick
/// threads and request handlers call them from anywhere.
pub trait Store: Send + Sync {
    // Entities

    /// Register a new entity in `state`. Type and name must be valid
    /// namespace segments.
    fn add_entity(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        state: &str,
        state_timeout: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Load an entity's full record
    fn get_entity(&self, entity_type: &EntityType, name: &EntityName) -> StoreResult<EntityRecord>;

    /// All entity names of a type, sorted
    fn list_entities(&self, entity_type: &EntityType) -> StoreResult<Vec<EntityName>>;

    /// Current state name of an entity
    fn get_state(&self, entity_type: &EntityType, name: &EntityName) -> StoreResult<String> {
        self.get_entity(entity_type, name).map(|r| r.state)
    }

    /// Unconditionally set state and timeout
    fn set_state(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        state: &str,
        state_timeout: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Set state and timeout only if the entity is currently in `expected`.
    /// Returns whether the write happened.
    fn compare_and_set_state(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        expected: &str,
        state: &str,
        state_timeout: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;

    /// Read an entity's counters
    fn get_counters(&self, entity_type: &EntityType, name: &EntityName) -> StoreResult<Counters>;

    /// Replace an entity's counters
    fn set_counters(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        counters: &Counters,
    ) -> StoreResult<()>;

    // Timeouts

    /// Names of entities whose state timeout is at or before `now`, oldest
    /// deadline first
    fn list_timed_out(
        &self,
        entity_type: &EntityType,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<EntityName>>;

    // Logs

    /// Append one line to an entity's log
    fn append_log(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        message: &str,
        source: LogSource,
    ) -> StoreResult<()>;

    /// Read an entity's log, oldest first
    fn get_logs(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        query: &LogQuery,
    ) -> StoreResult<Vec<LogEntry>>;

    /// Drop an entity's log; returns the number of lines removed
    fn delete_logs(&self, entity_type: &EntityType, name: &EntityName) -> StoreResult<usize>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
