//! Session configuration pushed to every injected target.

use crate::config::{IdeKind, SchedulerConfig};
use serde::{Deserialize, Serialize};

/// Command patterns the payload refuses to auto-run unless told otherwise.
pub const DEFAULT_BANNED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    "format c:",
    "del /f /s /q",
    "rmdir /s /q",
    ":(){:|:&};:",
    "dd if=",
    "mkfs.",
    "> /dev/sda",
];

/// Settings for one automation session.
///
/// Immutable once pushed: the coordinator replaces it wholesale and re-sends
/// the whole value to every injected target on each tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub is_pro: bool,
    pub is_background_mode: bool,
    pub poll_interval_ms: u64,
    pub ide_kind: IdeKind,
    pub banned_command_patterns: Vec<String>,
    pub auto_accept_file_edits: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            is_pro: false,
            is_background_mode: false,
            poll_interval_ms: SchedulerConfig::DEFAULT_POLL_INTERVAL_MS,
            ide_kind: IdeKind::default(),
            banned_command_patterns: DEFAULT_BANNED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            auto_accept_file_edits: true,
        }
    }
}

impl SessionConfig {
    pub fn for_ide(ide_kind: IdeKind) -> Self {
        Self {
            ide_kind,
            ..Self::default()
        }
    }

    /// Trim and dedupe banned patterns, drop empty ones, and clamp the poll
    /// interval to the payload's minimum.
    pub fn normalized(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.banned_command_patterns = self
            .banned_command_patterns
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .filter(|p| seen.insert(p.clone()))
            .collect();
        self.poll_interval_ms = self
            .poll_interval_ms
            .max(SchedulerConfig::MIN_POLL_INTERVAL_MS);
        self
    }

    /// The object handed to the payload's `start` entry point.
    pub fn to_wire(&self) -> WireConfig {
        WireConfig {
            is_pro: self.is_pro,
            is_background_mode: self.is_background_mode,
            poll_interval: self.poll_interval_ms,
            ide: self.ide_kind.as_str().to_string(),
            banned_commands: self.banned_command_patterns.clone(),
            auto_accept_file_edits: self.auto_accept_file_edits,
        }
    }
}

/// Payload-side shape of [`SessionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConfig {
    pub is_pro: bool,
    pub is_background_mode: bool,
    pub poll_interval: u64,
    pub ide: String,
    pub banned_commands: Vec<String>,
    pub auto_accept_file_edits: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_banned_list() {
        let config = SessionConfig::default();
        assert!(config.banned_command_patterns.iter().any(|p| p == "rm -rf /"));
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_normalized() {
        let config = SessionConfig {
            poll_interval_ms: 1,
            banned_command_patterns: vec![
                "  git push --force ".into(),
                "".into(),
                "git push --force".into(),
                "   ".into(),
                "npm publish".into(),
            ],
            ..SessionConfig::default()
        }
        .normalized();

        assert_eq!(
            config.banned_command_patterns,
            vec!["git push --force".to_string(), "npm publish".to_string()]
        );
        assert_eq!(config.poll_interval_ms, SchedulerConfig::MIN_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_wire_field_names() {
        let wire = SessionConfig::for_ide(IdeKind::VsCode).to_wire();
        let value = serde_json::to_value(&wire).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "isPro",
            "isBackgroundMode",
            "pollInterval",
            "ide",
            "bannedCommands",
            "autoAcceptFileEdits",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(value["ide"], "vscode");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"isPro": true, "ideKind": "windsurf"}"#).unwrap();
        assert!(config.is_pro);
        assert_eq!(config.ide_kind, IdeKind::Windsurf);
        assert!(!config.banned_command_patterns.is_empty());
    }
}
