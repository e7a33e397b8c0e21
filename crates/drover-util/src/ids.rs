//! Strongly-typed identifiers for drover

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{DroverError, Result};

/// Kind of entity a driver operates on (e.g. "device", "request").
///
/// Entity types form the first segment of a log namespace
/// (`<entity_type>.<entity_name>`), so they follow the same syntax rules as
/// entity names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that this type can be used as a namespace segment
    pub fn validate(&self) -> Result<()> {
        validate_segment("entity type", &self.0)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a single state-machine instance, unique within its entity type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityName(String);

impl EntityName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parse and validate a name in one step
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = Self(name.into());
        name.validate()?;
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Syntactic validity only; whether the entity exists is up to storage.
    pub fn validate(&self) -> Result<()> {
        validate_segment("entity name", &self.0)
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DroverError::invalid_name(format!("{what} must not be empty")));
    }
    if value.contains('.') {
        return Err(DroverError::invalid_name(format!(
            "{what} '{value}' must not contain '.'"
        )));
    }
    if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(DroverError::invalid_name(format!(
            "{what} '{value}' must not contain whitespace or control characters"
        )));
    }
    Ok(())
}

/// Unique identifier for one scheduler tick run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickRunId(Uuid);

impl TickRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TickRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TickRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_name_equality() {
        let a = EntityName::new("dev-1");
        let b = EntityName::from("dev-1");
        let c = EntityName::new("dev-2");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn entity_name_validation() {
        assert!(EntityName::parse("req-9").is_ok());
        assert!(EntityName::parse("panda-0001").is_ok());

        assert!(EntityName::parse("").is_err());
        assert!(EntityName::parse("device.dev-1").is_err());
        assert!(EntityName::parse("dev 1").is_err());
        assert!(EntityName::parse("dev\n1").is_err());
    }

    #[test]
    fn entity_type_validation() {
        assert!(EntityType::new("device").validate().is_ok());
        assert!(EntityType::new("").validate().is_err());
        assert!(EntityType::new("a.b").validate().is_err());
    }

    #[test]
    fn tick_run_id_uniqueness() {
        assert_ne!(TickRunId::new(), TickRunId::new());
    }

    #[test]
    fn ids_serialize_transparently() {
        let name = EntityName::new("dev-1");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"dev-1\"");
        let parsed: EntityName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);
    }
}
