//! Platform-specific path utilities.

use crate::config::{AppConfig, StoreConfig};
use crate::error::{AutopilotError, Result};
use std::path::PathBuf;

/// Get the per-user autopilot configuration directory.
///
/// # Platform Behavior
/// - **Linux**: `~/.config/autopilot/`
/// - **Windows**: `%APPDATA%/autopilot/`
/// - **macOS**: `~/Library/Application Support/autopilot/`
pub fn autopilot_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| AutopilotError::Config {
        message: "Could not determine config directory".to_string(),
    })?;
    Ok(config_dir.join(AppConfig::APP_CONFIG_DIR_NAME))
}

/// Get the path to the shared key/value store database.
///
/// Every supervisor process on the machine opens this same file; it is what
/// makes leader election and weekly stats cross-process.
pub fn store_db_path() -> Result<PathBuf> {
    Ok(autopilot_config_dir()?.join(StoreConfig::DB_FILENAME))
}

/// Get the default location of the settings file read by the CLI.
pub fn settings_path() -> Result<PathBuf> {
    Ok(autopilot_config_dir()?.join("settings.json"))
}
