//! Per-entity log types

use chrono::{DateTime, Utc};
use drover_util::{EntityName, EntityType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a log line
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// State-machine code running under a driver
    Statemachine,

    /// Request handlers
    #[default]
    Webapp,

    /// Anything else, kept verbatim
    Other(String),
}

impl LogSource {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Statemachine => "statemachine",
            Self::Webapp => "webapp",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for LogSource {
    fn from(s: &str) -> Self {
        match s {
            "statemachine" => Self::Statemachine,
            "webapp" => Self::Webapp,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Row ID, assigned by the store
    pub id: i64,

    pub entity_type: EntityType,
    pub entity_name: EntityName,
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub message: String,
}

/// Filter for reading logs back
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Only lines at or after this time
    pub since: Option<DateTime<Utc>>,

    /// Only the most recent N lines
    pub limit: Option<usize>,
}

impl LogQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn last(limit: usize) -> Self {
        Self {
            since: None,
            limit: Some(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_round_trips_through_str() {
        for source in [
            LogSource::Statemachine,
            LogSource::Webapp,
            LogSource::Other("inventory".into()),
        ] {
            assert_eq!(LogSource::from(source.as_str()), source);
        }
    }

    #[test]
    fn statemachine_source_name() {
        assert_eq!(LogSource::Statemachine.to_string(), "statemachine");
    }
}
