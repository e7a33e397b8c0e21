//! Default paths for drover components
//!
//! - Data: `$DROVER_DATA_DIR`, `$XDG_DATA_HOME/drover` or `~/.local/share/drover`
//! - Config: `$XDG_CONFIG_HOME/drover/config.toml` or `~/.config/drover/config.toml`
//! - Diagnostics: the system temp dir

use std::path::{Path, PathBuf};

/// Environment variable for overriding the data directory
pub const DROVER_DATA_DIR_ENV: &str = "DROVER_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "drover";

/// Prefix of overrun stack snapshot files
pub const FRAMES_FILE_PREFIX: &str = "current-frames-";

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$DROVER_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/drover` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/drover` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(DROVER_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking DROVER_DATA_DIR.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    std::env::temp_dir().join(APP_DIR).join("data")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Directory overrun snapshots are written to when none is configured
pub fn default_diagnostics_dir() -> PathBuf {
    std::env::temp_dir()
}

/// `<dir>/current-frames-<unix_timestamp>`
pub fn frames_file_path(dir: &Path, unix_ts: u64) -> PathBuf {
    dir.join(format!("{FRAMES_FILE_PREFIX}{unix_ts}"))
}
