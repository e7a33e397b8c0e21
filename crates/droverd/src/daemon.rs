//! One driver per configured entity type

use drover_config::{Config, ConfigSource};
use drover_core::{DriverResult, StateDriver, TableFactory};
use drover_store::Store;
use drover_util::EntityType;
use std::sync::Arc;
use tracing::{info, warn};

use crate::TableMachine;

/// Driver running a config-defined state table
pub type TableDriver = StateDriver<TableFactory<TableMachine>>;

/// All drivers of the daemon
pub struct Daemon {
    drivers: Vec<TableDriver>,
}

impl Daemon {
    /// Build (but do not start) a driver for every `[[machines]]` entry
    pub fn new(config: Config, store: Arc<dyn Store>) -> DriverResult<Self> {
        let settings = config.driver.clone();
        let specs = config.machines.clone();
        let config: Arc<dyn ConfigSource> = Arc::new(config);

        let drivers = specs
            .into_iter()
            .map(|spec| {
                let factory = TableFactory::new(spec.entity_type.clone(), TableMachine::new(spec));
                StateDriver::builder(factory, store.clone(), config.clone())
                    .settings(settings.clone())
                    .build()
            })
            .collect::<DriverResult<Vec<_>>>()?;

        if drivers.is_empty() {
            warn!("No machines configured; nothing to drive");
        }
        Ok(Self { drivers })
    }

    pub fn drivers(&self) -> &[TableDriver] {
        &self.drivers
    }

    pub fn driver(&self, entity_type: &EntityType) -> Option<&TableDriver> {
        self.drivers.iter().find(|d| d.entity_type() == entity_type)
    }

    /// Start every driver. If one fails to start, the ones already running
    /// are stopped again.
    pub fn start(&self) -> DriverResult<()> {
        for (i, driver) in self.drivers.iter().enumerate() {
            if let Err(e) = driver.start() {
                for started in &self.drivers[..i] {
                    started.stop();
                }
                return Err(e);
            }
        }
        info!(drivers = self.drivers.len(), "All drivers started");
        Ok(())
    }

    /// Stop every driver, waiting for in-flight ticks
    pub fn stop(&self) {
        for driver in &self.drivers {
            driver.stop();
        }
        info!("All drivers stopped");
    }
}
