//! Validated configuration and the key/value view drivers read from

use crate::schema::{RawConfig, RawDriverConfig, RawMachine, RawServerConfig};
use drover_util::{EntityType, default_data_dir, default_diagnostics_dir};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

/// Seconds between tick launches when not configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// First overrun re-check delay
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Growth factor of the overrun re-check delay
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.1;

/// Upper bound of the overrun re-check delay
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Source of optional string settings, addressed by section and key.
///
/// Drivers read the liveness marker path through this on every tick, so
/// implementations must be cheap and thread-safe.
pub trait ConfigSource: Send + Sync {
    fn get(&self, section: &str, key: &str) -> Option<String>;
}

/// Validated configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub driver: DriverSettings,
    pub machines: Vec<MachineSpec>,
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            server: ServerConfig::from_raw(raw.server),
            driver: DriverSettings::from_raw(raw.driver),
            machines: raw.machines.into_iter().map(MachineSpec::from_raw).collect(),
        }
    }

    pub fn get_machine(&self, entity_type: &EntityType) -> Option<&MachineSpec> {
        self.machines.iter().find(|m| &m.entity_type == entity_type)
    }
}

impl ConfigSource for Config {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string());
        match (section, key) {
            ("server", "fqdn") => self.server.fqdn.clone(),
            ("server", "heartbeat_file") => path(&self.server.heartbeat_file),
            ("server", "data_dir") => Some(self.server.data_dir.display().to_string()),
            ("driver", "poll_interval_secs") => {
                Some(self.driver.poll_interval.as_secs_f64().to_string())
            }
            ("driver", "diagnostics_dir") => {
                Some(self.driver.diagnostics_dir.display().to_string())
            }
            _ => None,
        }
    }
}

/// Host-level settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub fqdn: Option<String>,
    pub heartbeat_file: Option<PathBuf>,
    pub data_dir: PathBuf,
}

impl ServerConfig {
    fn from_raw(raw: RawServerConfig) -> Self {
        Self {
            fqdn: raw.fqdn,
            heartbeat_file: raw.heartbeat_file,
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_raw(RawServerConfig::default())
    }
}

/// Scheduler cadence and overrun handling
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub poll_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_factor: f64,
    pub backoff_cap: Duration,
    pub diagnostics_dir: PathBuf,
}

impl DriverSettings {
    fn from_raw(raw: RawDriverConfig) -> Self {
        let secs = |v: Option<f64>, default: Duration| {
            v.and_then(|v| Duration::try_from_secs_f64(v).ok())
                .unwrap_or(default)
        };
        Self {
            poll_interval: secs(raw.poll_interval_secs, DEFAULT_POLL_INTERVAL),
            backoff_initial: secs(raw.backoff_initial_secs, DEFAULT_BACKOFF_INITIAL),
            backoff_factor: raw.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR),
            backoff_cap: secs(raw.backoff_cap_secs, DEFAULT_BACKOFF_CAP),
            diagnostics_dir: raw.diagnostics_dir.unwrap_or_else(default_diagnostics_dir),
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from_raw(RawDriverConfig::default())
    }
}

/// A table-driven entity type
#[derive(Debug, Clone)]
pub struct MachineSpec {
    pub entity_type: EntityType,
    pub states: Vec<StateSpec>,
}

impl MachineSpec {
    fn from_raw(raw: RawMachine) -> Self {
        Self {
            entity_type: EntityType::new(raw.entity_type),
            states: raw
                .states
                .into_iter()
                .map(|s| StateSpec {
                    name: s.name,
                    timeout: s.timeout_secs.map(Duration::from_secs),
                    on_timeout: s.on_timeout,
                    events: s.events,
                })
                .collect(),
        }
    }

    pub fn state(&self, name: &str) -> Option<&StateSpec> {
        self.states.iter().find(|s| s.name == name)
    }
}

/// One state in a table-driven machine
#[derive(Debug, Clone)]
pub struct StateSpec {
    pub name: String,
    pub timeout: Option<Duration>,
    pub on_timeout: Option<String>,
    pub events: BTreeMap<String, String>,
}

/// In-memory settings, changeable at runtime
#[derive(Debug, Default)]
pub struct StaticConfig {
    values: RwLock<HashMap<(String, String), String>>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, section: &str, key: &str, value: impl Into<String>) -> Self {
        self.set(section, key, value);
        self
    }

    pub fn set(&self, section: &str, key: &str, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((section.to_string(), key.to_string()), value.into());
    }

    pub fn remove(&self, section: &str, key: &str) {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(section.to_string(), key.to_string()));
    }
}

impl ConfigSource for StaticConfig {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }
}
