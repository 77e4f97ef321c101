//! Centralized configuration for the autopilot supervisor.
//!
//! This module provides configuration constants for discovery, the control
//! protocol, scheduling, leader election and storage, plus the supported
//! IDE kinds.

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Autopilot";
    pub const APP_CONFIG_DIR_NAME: &'static str = "autopilot";
}

/// Target discovery over the debugging HTTP endpoint.
pub struct DiscoveryConfig;

impl DiscoveryConfig {
    pub const HOST: &'static str = "127.0.0.1";
    pub const LIST_PATH: &'static str = "/json/list";
    pub const DEFAULT_PORT_START: u16 = 9222;
    pub const DEFAULT_PORT_END: u16 = 9232;
    /// Single well-known port some relaunch shortcuts use instead of the range.
    pub const ALTERNATE_PORT: u16 = 9000;
    pub const PROBE_TIMEOUT: Duration = Duration::from_millis(1000);
    pub const DEVTOOLS_URL_PREFIX: &'static str = "devtools://";
}

/// Control-socket RPC settings.
pub struct RpcConfig;

impl RpcConfig {
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Interval of the backstop sweep that rejects calls past their deadline.
    pub const DEADLINE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
    pub const EVALUATE_METHOD: &'static str = "Runtime.evaluate";
}

/// Scheduler cadence.
pub struct SchedulerConfig;

impl SchedulerConfig {
    pub const TICK_INTERVAL: Duration = Duration::from_millis(5000);
    pub const STATS_INTERVAL: Duration = Duration::from_millis(10_000);
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
    pub const MIN_POLL_INTERVAL_MS: u64 = 50;
}

/// Cross-process leader election.
pub struct ElectionConfig;

impl ElectionConfig {
    pub const STALE_AFTER: Duration = Duration::from_millis(10_000);
}

/// Shared key/value store.
pub struct StoreConfig;

impl StoreConfig {
    pub const DB_FILENAME: &'static str = "state.db";
    pub const BUSY_TIMEOUT_MS: u32 = 5000;
}

/// Names used to talk to the injected automation payload.
pub struct PayloadConfig;

impl PayloadConfig {
    /// Global object the bootstrap script installs.
    pub const GLOBAL: &'static str = "__autopilot";
    /// Returned by wrappers when the global is missing (page reloaded, never injected).
    pub const NOT_INJECTED: &'static str = "not-injected";
}

/// IDE kinds the supervisor knows how to drive.
///
/// The kind namespaces every shared store key, so separate IDEs running side
/// by side elect separate leaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeKind {
    Cursor,
    Antigravity,
    #[serde(rename = "vscode")]
    VsCode,
    Windsurf,
}

impl IdeKind {
    pub const ALL: [IdeKind; 4] = [
        IdeKind::Cursor,
        IdeKind::Antigravity,
        IdeKind::VsCode,
        IdeKind::Windsurf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdeKind::Cursor => "cursor",
            IdeKind::Antigravity => "antigravity",
            IdeKind::VsCode => "vscode",
            IdeKind::Windsurf => "windsurf",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            IdeKind::Cursor => "Cursor",
            IdeKind::Antigravity => "Antigravity",
            IdeKind::VsCode => "Visual Studio Code",
            IdeKind::Windsurf => "Windsurf",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cursor" => Some(IdeKind::Cursor),
            "antigravity" => Some(IdeKind::Antigravity),
            "vscode" | "code" => Some(IdeKind::VsCode),
            "windsurf" => Some(IdeKind::Windsurf),
            _ => None,
        }
    }
}

impl Default for IdeKind {
    fn default() -> Self {
        IdeKind::Cursor
    }
}

impl std::fmt::Display for IdeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
