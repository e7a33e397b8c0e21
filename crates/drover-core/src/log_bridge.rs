//! Routing of per-entity log records into entity log storage
//!
//! Machine code logs through an [`EntityLog`] handed to it in its
//! [`MachineContext`](crate::MachineContext). Every record goes to `tracing`
//! and, while the driver's [`LogBridge`] is attached, into the store's log
//! for that entity with source `statemachine`.

use drover_store::{LogSource, Store};
use drover_util::{EntityName, EntityType};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{Level, debug, warn};

/// One log line produced by machine code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub entity_type: EntityType,
    pub entity_name: EntityName,
    pub level: Level,
    pub message: String,
    pub source: LogSource,
}

impl LogRecord {
    pub fn new(
        entity_type: EntityType,
        entity_name: EntityName,
        level: Level,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            entity_name,
            level,
            message: message.into(),
            source: LogSource::Statemachine,
        }
    }

    /// `<entity_type>.<entity_name>`
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.entity_type, self.entity_name)
    }
}

/// Destination for log records
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &LogRecord);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn emit(&self, _record: &LogRecord) {}
}

/// Forwards records of one entity type into the store's per-entity log
pub struct LogBridge {
    entity_type: EntityType,
    store: Arc<dyn Store>,
    attached: AtomicBool,
    forwarded: AtomicU64,
}

impl LogBridge {
    /// Create a detached bridge bound to `entity_type`
    pub fn new(entity_type: EntityType, store: Arc<dyn Store>) -> Self {
        Self {
            entity_type,
            store,
            attached: AtomicBool::new(false),
            forwarded: AtomicU64::new(0),
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn attach(&self) {
        if !self.attached.swap(true, Ordering::SeqCst) {
            debug!(entity_type = %self.entity_type, "Log bridge attached");
        }
    }

    pub fn detach(&self) {
        if self.attached.swap(false, Ordering::SeqCst) {
            debug!(entity_type = %self.entity_type, "Log bridge detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Number of records written to the store so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::SeqCst)
    }

    /// Route a message by logger namespace. Only namespaces of exactly two
    /// segments whose first segment is this bridge's entity type are
    /// forwarded; everything else is ignored. Returns whether it was stored.
    pub fn emit_namespaced(&self, namespace: &str, message: &str) -> bool {
        let segments: Vec<&str> = namespace.split('.').collect();
        let [kind, name] = segments.as_slice() else {
            return false;
        };
        if *kind != self.entity_type.as_str() {
            return false;
        }
        let Ok(name) = EntityName::parse(*name) else {
            return false;
        };
        self.forward(&name, message)
    }

    fn forward(&self, name: &EntityName, message: &str) -> bool {
        if !self.is_attached() {
            return false;
        }
        match self
            .store
            .append_log(&self.entity_type, name, message, LogSource::Statemachine)
        {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(entity_type = %self.entity_type, entity = %name, error = %e, "Failed to store log line");
                false
            }
        }
    }
}

impl LogSink for LogBridge {
    fn emit(&self, record: &LogRecord) {
        self.emit_namespaced(&record.namespace(), &record.message);
    }
}

impl fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBridge")
            .field("entity_type", &self.entity_type)
            .field("attached", &self.is_attached())
            .field("forwarded", &self.forwarded())
            .finish()
    }
}

/// Logger handed to machine code for one entity
#[derive(Clone)]
pub struct EntityLog {
    entity_type: EntityType,
    entity_name: EntityName,
    sink: Arc<dyn LogSink>,
}

impl EntityLog {
    pub fn new(entity_type: EntityType, entity_name: EntityName, sink: Arc<dyn LogSink>) -> Self {
        Self {
            entity_type,
            entity_name,
            sink,
        }
    }

    /// A logger whose records only reach `tracing`
    pub fn detached(entity_type: EntityType, entity_name: EntityName) -> Self {
        Self::new(entity_type, entity_name, Arc::new(NullSink))
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Level::INFO, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(Level::WARN, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Level::ERROR, message);
    }

    pub fn log(&self, level: Level, message: impl fmt::Display) {
        let record = LogRecord::new(
            self.entity_type.clone(),
            self.entity_name.clone(),
            level,
            message.to_string(),
        );

        let (kind, entity, msg) = (&record.entity_type, &record.entity_name, &record.message);
        match level {
            Level::ERROR => tracing::error!(target: "statemachine", entity_type = %kind, entity = %entity, "{msg}"),
            Level::WARN => tracing::warn!(target: "statemachine", entity_type = %kind, entity = %entity, "{msg}"),
            Level::INFO => tracing::info!(target: "statemachine", entity_type = %kind, entity = %entity, "{msg}"),
            Level::DEBUG => tracing::debug!(target: "statemachine", entity_type = %kind, entity = %entity, "{msg}"),
            _ => tracing::trace!(target: "statemachine", entity_type = %kind, entity = %entity, "{msg}"),
        }

        self.sink.emit(&record);
    }
}

impl fmt::Debug for EntityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityLog({}.{})", self.entity_type, self.entity_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_store::{LogQuery, SqliteStore};

    fn setup() -> (Arc<SqliteStore>, LogBridge) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let bridge = LogBridge::new(EntityType::new("device"), store.clone());
        (store, bridge)
    }

    fn logs(store: &SqliteStore, name: &str) -> Vec<String> {
        store
            .get_logs(&EntityType::new("device"), &name.into(), &LogQuery::all())
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn forwards_only_when_attached() {
        let (store, bridge) = setup();
        assert!(!bridge.emit_namespaced("device.dev-1", "before attach"));

        bridge.attach();
        assert!(bridge.emit_namespaced("device.dev-1", "entering state ready"));

        bridge.detach();
        assert!(!bridge.emit_namespaced("device.dev-1", "after detach"));

        assert_eq!(logs(&store, "dev-1"), vec!["entering state ready"]);
        assert_eq!(bridge.forwarded(), 1);
    }

    #[test]
    fn ignores_foreign_and_malformed_namespaces() {
        let (store, bridge) = setup();
        bridge.attach();

        assert!(!bridge.emit_namespaced("device", "one segment"));
        assert!(!bridge.emit_namespaced("device.dev-1.extra", "three segments"));
        assert!(!bridge.emit_namespaced("request.dev-1", "other type"));
        assert!(!bridge.emit_namespaced("device.", "empty name"));

        assert!(logs(&store, "dev-1").is_empty());
    }

    #[test]
    fn stored_lines_use_statemachine_source() {
        let (store, bridge) = setup();
        bridge.attach();
        let bridge = Arc::new(bridge);

        let log = EntityLog::new(EntityType::new("device"), "dev-7".into(), bridge.clone());
        log.info("entering state pxe_booting");
        log.warn("ignored event bogus in state ready");

        let entries = store
            .get_logs(&EntityType::new("device"), &"dev-7".into(), &LogQuery::all())
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.source == LogSource::Statemachine));
        assert_eq!(entries[1].message, "ignored event bogus in state ready");
    }

    #[test]
    fn detached_entity_log_stores_nothing() {
        let (store, _bridge) = setup();
        let log = EntityLog::detached(EntityType::new("device"), "dev-1".into());
        log.error("nobody listens");
        assert!(logs(&store, "dev-1").is_empty());
    }

    #[test]
    fn record_namespace() {
        let record = LogRecord::new("request".into(), "req-9".into(), Level::INFO, "x");
        assert_eq!(record.namespace(), "request.req-9");
        assert_eq!(record.source, LogSource::Statemachine);
    }
}
