//! Configuration parsing and validation for drover
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Host settings (fqdn, liveness marker, data dir)
//! - Scheduler cadence and overrun backoff
//! - Table-driven entity types for the daemon
//! - Validation with clear error messages

mod config;
mod schema;
mod validation;

pub use config::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::debug!(path = %path.display(), machines = config.machines.len(), "Config loaded");
    Ok(config)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Config> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Config::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let config = r#"
            config_version = 1

            [server]
            heartbeat_file = "/var/run/drover/heartbeat"

            [driver]
            poll_interval_secs = 2.5
        "#;

        let config = parse_config(config).unwrap();
        assert_eq!(config.driver.poll_interval, Duration::from_millis(2500));
        assert_eq!(
            config.get("server", "heartbeat_file").as_deref(),
            Some("/var/run/drover/heartbeat")
        );
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_config() {
        let config = r#"
            config_version = 1
            [driver]
            backoff_factor = 0.9
        "#;
        assert!(matches!(
            parse_config(config),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn reject_huge_poll_interval() {
        let config = "config_version = 1\n[driver]\npoll_interval_secs = 1e30\n";
        assert!(matches!(
            parse_config(config),
            Err(ConfigError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            config_version = 1
            [[machines]]
            entity_type = "device"
            [[machines.states]]
            name = "ready"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.machines[0].entity_type.as_str(), "device");
    }
}
