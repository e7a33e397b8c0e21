//! Config validation CLI tool
//!
//! Validates a drover configuration file and reports any errors.

use drover_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a drover configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match drover_config::load_config(&config_path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!();
            println!("Poll interval: {:?}", config.driver.poll_interval);
            println!(
                "Overrun backoff: {:?} x{} up to {:?}",
                config.driver.backoff_initial, config.driver.backoff_factor, config.driver.backoff_cap
            );
            match &config.server.heartbeat_file {
                Some(path) => println!("Heartbeat file: {}", path.display()),
                None => println!("Heartbeat file: (disabled)"),
            }
            println!();
            println!("Machines: {}", config.machines.len());
            for machine in &config.machines {
                println!("  - {} ({} states)", machine.entity_type, machine.states.len());
            }
            ExitCode::SUCCESS
        }
        Err(drover_config::ConfigError::ValidationFailed { errors }) => {
            eprintln!("Configuration has {} error(s):", errors.len());
            for error in errors {
                eprintln!("  - {error}");
            }
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}
