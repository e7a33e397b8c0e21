//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Host-level settings
    #[serde(default)]
    pub server: RawServerConfig,

    /// Scheduler settings shared by all drivers
    #[serde(default)]
    pub driver: RawDriverConfig,

    /// Table-driven entity types run by the daemon
    #[serde(default)]
    pub machines: Vec<RawMachine>,
}

/// `[server]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServerConfig {
    /// Name this host is known by in storage
    pub fqdn: Option<String>,

    /// Liveness marker touched on every tick
    pub heartbeat_file: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,
}

/// `[driver]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDriverConfig {
    /// Seconds between tick launches (default 10)
    pub poll_interval_secs: Option<f64>,

    /// First overrun re-check delay (default 1)
    pub backoff_initial_secs: Option<f64>,

    /// Growth per overrun re-check (default 1.1)
    pub backoff_factor: Option<f64>,

    /// Upper bound for the overrun re-check delay (default 60)
    pub backoff_cap_secs: Option<f64>,

    /// Where overrun stack snapshots go (default: system temp dir)
    pub diagnostics_dir: Option<PathBuf>,
}

/// `[[machines]]` entry: one entity type and its state table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawMachine {
    pub entity_type: String,

    #[serde(default)]
    pub states: Vec<RawState>,
}

/// One state of a table-driven machine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawState {
    pub name: String,

    /// Seconds until the state times out; absent means never
    pub timeout_secs: Option<u64>,

    /// State entered on timeout; absent means the timeout is just cleared
    pub on_timeout: Option<String>,

    /// Event name -> target state
    #[serde(default)]
    pub events: BTreeMap<String, String>,
}
