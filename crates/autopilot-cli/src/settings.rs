//! Optional JSON settings file, merged underneath command-line flags.
//!
//! ```json
//! {
//!   "ide": "cursor",
//!   "payload": "/path/to/payload.js",
//!   "portStart": 9222,
//!   "portEnd": 9232,
//!   "tickIntervalMs": 5000,
//!   "session": { "isPro": true, "bannedCommandPatterns": ["git push --force"] }
//! }
//! ```

use crate::cli::RunArgs;
use anyhow::{bail, Context, Result};
use autopilot_core::config::SchedulerConfig;
use autopilot_core::{IdeKind, SessionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub ide: Option<IdeKind>,
    pub payload: Option<PathBuf>,
    pub port_start: Option<u16>,
    pub port_end: Option<u16>,
    pub tick_interval_ms: Option<u64>,
    pub stats_interval_ms: Option<u64>,
    pub session: Option<SessionConfig>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Load the explicit file, or the default one if it exists.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match autopilot_core::platform::settings_path() {
            Ok(path) if path.exists() => {
                debug!("Using settings from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

/// Fully resolved options for `run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub ide: IdeKind,
    pub payload: PathBuf,
    pub port_start: u16,
    pub port_end: u16,
    pub tick_interval: Duration,
    pub stats_interval: Duration,
    pub session: SessionConfig,
}

/// Merge flags over settings over defaults.
pub fn resolve_run(args: &RunArgs, settings: Settings) -> Result<RunOptions> {
    let ide = args
        .target
        .ide
        .or(settings.ide)
        .or_else(|| settings.session.as_ref().map(|s| s.ide_kind))
        .unwrap_or_default();

    let payload = args
        .payload
        .clone()
        .or(settings.payload)
        .context("No payload script given (use --payload or the settings file)")?;

    let (port_start, port_end) = args
        .target
        .port_range((settings.port_start, settings.port_end));

    let mut session = settings.session.unwrap_or_default();
    session.ide_kind = ide;
    if args.pro {
        session.is_pro = true;
    }
    if args.background {
        session.is_background_mode = true;
    }
    if let Some(poll_ms) = args.poll_ms {
        session.poll_interval_ms = poll_ms;
    }
    if args.no_auto_accept {
        session.auto_accept_file_edits = false;
    }
    session
        .banned_command_patterns
        .extend(args.banned.iter().cloned());

    let tick_ms = args
        .tick_ms
        .or(settings.tick_interval_ms)
        .unwrap_or(SchedulerConfig::TICK_INTERVAL.as_millis() as u64);
    let stats_ms = args
        .stats_ms
        .or(settings.stats_interval_ms)
        .unwrap_or(SchedulerConfig::STATS_INTERVAL.as_millis() as u64);
    if tick_ms == 0 || stats_ms == 0 {
        bail!("Tick and stats intervals must be greater than zero");
    }

    Ok(RunOptions {
        ide,
        payload,
        port_start,
        port_end,
        tick_interval: Duration::from_millis(tick_ms),
        stats_interval: Duration::from_millis(stats_ms),
        session: session.normalized(),
    })
}
