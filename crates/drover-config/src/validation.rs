//! Configuration validation

use crate::schema::{RawConfig, RawDriverConfig, RawMachine};
use drover_util::EntityType;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Machine '{entity_type}': {message}")]
    MachineError { entity_type: String, message: String },

    #[error("Duplicate entity type: {0}")]
    DuplicateEntityType(String),

    #[error("Driver setting '{key}': {message}")]
    DriverError { key: &'static str, message: String },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_driver(&config.driver);

    let mut seen_types = HashSet::new();
    for machine in &config.machines {
        if !seen_types.insert(&machine.entity_type) {
            errors.push(ValidationError::DuplicateEntityType(
                machine.entity_type.clone(),
            ));
        }
    }

    for machine in &config.machines {
        errors.extend(validate_machine(machine));
    }

    errors
}

fn validate_driver(driver: &RawDriverConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let positive = [
        ("poll_interval_secs", driver.poll_interval_secs),
        ("backoff_initial_secs", driver.backoff_initial_secs),
        ("backoff_cap_secs", driver.backoff_cap_secs),
    ];
    for (key, value) in positive {
        if let Some(v) = value
            && !(v > 0.0 && Duration::try_from_secs_f64(v).is_ok())
        {
            errors.push(ValidationError::DriverError {
                key,
                message: format!("must be a positive number of seconds, got {v}"),
            });
        }
    }

    if let Some(factor) = driver.backoff_factor
        && !(factor.is_finite() && factor >= 1.0)
    {
        errors.push(ValidationError::DriverError {
            key: "backoff_factor",
            message: format!("must be >= 1.0, got {factor}"),
        });
    }

    if let (Some(initial), Some(cap)) = (driver.backoff_initial_secs, driver.backoff_cap_secs)
        && initial > cap
    {
        errors.push(ValidationError::DriverError {
            key: "backoff_cap_secs",
            message: format!("cap {cap} is below initial delay {initial}"),
        });
    }

    errors
}

fn validate_machine(machine: &RawMachine) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let machine_error = |message: String| ValidationError::MachineError {
        entity_type: machine.entity_type.clone(),
        message,
    };

    if let Err(e) = EntityType::new(machine.entity_type.clone()).validate() {
        errors.push(machine_error(e.to_string()));
    }

    if machine.states.is_empty() {
        errors.push(machine_error("at least one state is required".into()));
    }

    let mut names = HashSet::new();
    for state in &machine.states {
        if state.name.is_empty() {
            errors.push(machine_error("state name cannot be empty".into()));
        }
        if !names.insert(state.name.as_str()) {
            errors.push(machine_error(format!("duplicate state '{}'", state.name)));
        }
    }

    for state in &machine.states {
        if let Some(target) = &state.on_timeout
            && !names.contains(target.as_str())
        {
            errors.push(machine_error(format!(
                "state '{}' times out into unknown state '{target}'",
                state.name
            )));
        }
        if state.on_timeout.is_some() && state.timeout_secs.is_none() {
            errors.push(machine_error(format!(
                "state '{}' has on_timeout but no timeout_secs",
                state.name
            )));
        }
        for (event, target) in &state.events {
            if !names.contains(target.as_str()) {
                errors.push(machine_error(format!(
                    "event '{event}' in state '{}' targets unknown state '{target}'",
                    state.name
                )));
            }
        }
    }

    errors
}
