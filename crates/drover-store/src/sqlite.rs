//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use drover_util::{EntityName, EntityType};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    Counters, EntityRecord, LogEntry, LogQuery, LogSource, Store, StoreError, StoreResult,
};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- One row per state machine instance
            CREATE TABLE IF NOT EXISTS entities (
                entity_type TEXT NOT NULL,
                name TEXT NOT NULL,
                state TEXT NOT NULL,
                state_timeout_ms INTEGER,
                counters_json TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (entity_type, name)
            );

            -- Per-entity logs (append-only)
            CREATE TABLE IF NOT EXISTS entity_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_type TEXT NOT NULL,
                name TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                source TEXT NOT NULL,
                message TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_entities_timeout
                ON entities(entity_type, state_timeout_ms);
            CREATE INDEX IF NOT EXISTS idx_logs_entity
                ON entity_logs(entity_type, name, ts_ms);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn not_found(entity_type: &EntityType, name: &EntityName) -> StoreError {
    StoreError::NotFound(format!("{entity_type}.{name}"))
}

fn to_ms(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn from_ms(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn entity_exists(conn: &Connection, entity_type: &EntityType, name: &EntityName) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM entities WHERE entity_type = ? AND name = ?",
            params![entity_type.as_str(), name.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl Store for SqliteStore {
    fn add_entity(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        state: &str,
        state_timeout: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        entity_type.validate()?;
        name.validate()?;

        let conn = self.conn()?;
        if entity_exists(&conn, entity_type, name)? {
            return Err(StoreError::AlreadyExists(format!("{entity_type}.{name}")));
        }

        conn.execute(
            "INSERT INTO entities (entity_type, name, state, state_timeout_ms) VALUES (?, ?, ?, ?)",
            params![entity_type.as_str(), name.as_str(), state, to_ms(state_timeout)],
        )?;

        debug!(entity_type = %entity_type, entity = %name, state, "Entity added");
        Ok(())
    }

    fn get_entity(&self, entity_type: &EntityType, name: &EntityName) -> StoreResult<EntityRecord> {
        let conn = self.conn()?;

        let row: Option<(String, Option<i64>, String)> = conn
            .query_row(
                "SELECT state, state_timeout_ms, counters_json FROM entities
                 WHERE entity_type = ? AND name = ?",
                params![entity_type.as_str(), name.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (state, timeout_ms, counters_json) = row.ok_or_else(|| not_found(entity_type, name))?;

        Ok(EntityRecord {
            entity_type: entity_type.clone(),
            name: name.clone(),
            state,
            state_timeout: from_ms(timeout_ms),
            counters: serde_json::from_str(&counters_json)?,
        })
    }

    fn list_entities(&self, entity_type: &EntityType) -> StoreResult<Vec<EntityName>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT name FROM entities WHERE entity_type = ? ORDER BY name")?;
        let names = stmt
            .query_map([entity_type.as_str()], |row| row.get::<_, String>(0))?
            .map(|r| r.map(EntityName::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn set_state(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        state: &str,
        state_timeout: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE entities SET state = ?, state_timeout_ms = ? WHERE entity_type = ? AND name = ?",
            params![state, to_ms(state_timeout), entity_type.as_str(), name.as_str()],
        )?;

        if updated == 0 {
            return Err(not_found(entity_type, name));
        }
        debug!(entity_type = %entity_type, entity = %name, state, "State set");
        Ok(())
    }

    fn compare_and_set_state(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        expected: &str,
        state: &str,
        state_timeout: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE entities SET state = ?, state_timeout_ms = ?
             WHERE entity_type = ? AND name = ? AND state = ?",
            params![
                state,
                to_ms(state_timeout),
                entity_type.as_str(),
                name.as_str(),
                expected
            ],
        )?;

        if updated == 0 {
            if !entity_exists(&conn, entity_type, name)? {
                return Err(not_found(entity_type, name));
            }
            debug!(entity_type = %entity_type, entity = %name, expected, "Compare-and-set lost");
            return Ok(false);
        }
        Ok(true)
    }

    fn get_counters(&self, entity_type: &EntityType, name: &EntityName) -> StoreResult<Counters> {
        self.get_entity(entity_type, name).map(|r| r.counters)
    }

    fn set_counters(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        counters: &Counters,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(counters)?;
        let updated = conn.execute(
            "UPDATE entities SET counters_json = ? WHERE entity_type = ? AND name = ?",
            params![json, entity_type.as_str(), name.as_str()],
        )?;

        if updated == 0 {
            return Err(not_found(entity_type, name));
        }
        Ok(())
    }

    fn list_timed_out(
        &self,
        entity_type: &EntityType,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<EntityName>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM entities
             WHERE entity_type = ? AND state_timeout_ms IS NOT NULL AND state_timeout_ms <= ?
             ORDER BY state_timeout_ms, name",
        )?;
        let names = stmt
            .query_map(params![entity_type.as_str(), now.timestamp_millis()], |row| {
                row.get::<_, String>(0)
            })?
            .map(|r| r.map(EntityName::new))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn append_log(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        message: &str,
        source: LogSource,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO entity_logs (entity_type, name, ts_ms, source, message) VALUES (?, ?, ?, ?, ?)",
            params![
                entity_type.as_str(),
                name.as_str(),
                drover_util::now_utc().timestamp_millis(),
                source.as_str(),
                message
            ],
        )?;
        Ok(())
    }

    fn get_logs(
        &self,
        entity_type: &EntityType,
        name: &EntityName,
        query: &LogQuery,
    ) -> StoreResult<Vec<LogEntry>> {
        let conn = self.conn()?;
        let since_ms = query.since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let mut stmt = conn.prepare(
            "SELECT id, ts_ms, source, message FROM entity_logs
             WHERE entity_type = ? AND name = ? AND ts_ms >= ?
             ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map(
            params![entity_type.as_str(), name.as_str(), since_ms, limit],
            |row| {
                let id: i64 = row.get(0)?;
                let ts_ms: i64 = row.get(1)?;
                let source: String = row.get(2)?;
                let message: String = row.get(3)?;
                Ok((id, ts_ms, source, message))
            },
        )?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, ts_ms, source, message) = row?;
            let timestamp = DateTime::from_timestamp_millis(ts_ms).unwrap_or_else(|| {
                warn!(id, ts_ms, "Log timestamp out of range");
                DateTime::<Utc>::MIN_UTC
            });
            entries.push(LogEntry {
                id,
                entity_type: entity_type.clone(),
                entity_name: name.clone(),
                timestamp,
                source: LogSource::from(source.as_str()),
                message,
            });
        }

        entries.reverse();
        Ok(entries)
    }

    fn delete_logs(&self, entity_type: &EntityType, name: &EntityName) -> StoreResult<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM entity_logs WHERE entity_type = ? AND name = ?",
            params![entity_type.as_str(), name.as_str()],
        )?;
        Ok(deleted)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
