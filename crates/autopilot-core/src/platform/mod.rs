//! Platform-specific paths.

mod paths;

pub use paths::{autopilot_config_dir, settings_path, store_db_path};
