//! The automation payload and the expressions that call into it.
//!
//! The bootstrap script is opaque text supplied by the host. Once evaluated in
//! a page it installs a global object exposing `start`, `stop`, `getStats`,
//! `takeNotification` and `resetCircuit`. Every wrapper below checks for that
//! global first, so a page that reloaded since injection answers with the
//! not-injected marker (or `null` for reads) instead of throwing.

use crate::config::PayloadConfig;
use crate::session::WireConfig;
use crate::{AutopilotError, Result};
use std::path::Path;
use std::sync::Arc;

/// Bootstrap script evaluated once per target.
#[derive(Debug, Clone)]
pub struct Payload {
    script: Arc<str>,
}

impl Payload {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: Arc::from(script.into()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let script = std::fs::read_to_string(path)
            .map_err(|e| AutopilotError::io_with_path(e, path))?;
        if script.trim().is_empty() {
            return Err(AutopilotError::Validation {
                field: "payload".to_string(),
                message: format!("{} is empty", path.display()),
            });
        }
        Ok(Self::new(script))
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

fn guarded_call(call: &str, missing: &str) -> String {
    format!(
        "(() => {{ const api = globalThis.{global}; \
         if (!api) return {missing}; \
         return api.{call}; }})()",
        global = PayloadConfig::GLOBAL,
    )
}

fn not_injected_literal() -> String {
    format!("\"{}\"", PayloadConfig::NOT_INJECTED)
}

/// `start(config)`; resolves to the payload's acknowledgement string.
pub fn start_expression(config: &WireConfig) -> Result<String> {
    let json = serde_json::to_string(config)?;
    Ok(guarded_call(
        &format!("start({json})"),
        &not_injected_literal(),
    ))
}

/// `stop()`.
pub fn stop_expression() -> String {
    guarded_call("stop()", &not_injected_literal())
}

/// `getStats(reset)`; resolves to `{clicks, blockedCommands}` or `null`.
pub fn stats_expression(reset: bool) -> String {
    guarded_call(&format!("getStats({reset})"), "null")
}

/// `takeNotification()`; resolves to an envelope or `null`.
pub fn notification_expression() -> String {
    guarded_call("takeNotification()", "null")
}

/// `resetCircuit()`.
pub fn reset_circuit_expression() -> String {
    guarded_call("resetCircuit()", &not_injected_literal())
}

/// Whether an evaluation result is the not-injected marker.
pub fn is_not_injected(value: &serde_json::Value) -> bool {
    value.as_str() == Some(PayloadConfig::NOT_INJECTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    #[test]
    fn test_start_expression_embeds_config() {
        let wire = SessionConfig::default().to_wire();
        let expr = start_expression(&wire).unwrap();
        assert!(expr.contains("globalThis.__autopilot"));
        assert!(expr.contains(".start({"));
        assert!(expr.contains("\"pollInterval\":1000"));
        assert!(expr.contains("\"not-injected\""));
    }

    #[test]
    fn test_read_wrappers_return_null_when_missing() {
        assert!(stats_expression(true).contains("return null"));
        assert!(stats_expression(true).contains("getStats(true)"));
        assert!(notification_expression().contains("return null"));
    }

    #[test]
    fn test_is_not_injected() {
        assert!(is_not_injected(&serde_json::json!("not-injected")));
        assert!(!is_not_injected(&serde_json::json!("started")));
        assert!(!is_not_injected(&serde_json::Value::Null));
    }

    #[test]
    fn test_from_file_rejects_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("payload.js");
        std::fs::write(&path, "   \n").unwrap();
        assert!(Payload::from_file(&path).is_err());

        std::fs::write(&path, "globalThis.__autopilot = {};").unwrap();
        let payload = Payload::from_file(&path).unwrap();
        assert!(payload.script().starts_with("globalThis"));
    }
}
