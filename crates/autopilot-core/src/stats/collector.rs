//! Periodic stats collection and notification relay.
//!
//! Collection only reads from targets, so its loop runs on every process
//! whether or not it holds the leader lock. It polls the targets in this
//! process's own connection table. A standby process never connects, so in
//! practice only the leader collects; a standby's passes poll nothing and
//! pick up the work once it takes over.

use super::weekly::{StatsSnapshot, WeeklyLedger, WeeklyStats};
use crate::store::run_blocking;
use crate::targets::{payload, ConnectionManager};
use crate::{AutopilotError, Result};
use chrono::{DateTime, Local, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Notification types the payload can post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The payload stopped retrying a failing action and wants the user.
    RetryCircuitBroken,
    #[serde(other)]
    Unknown,
}

/// Single-slot mailbox entry read from a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// User-facing alert raised from a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub target_id: String,
    pub kind: NotificationKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Outcome of one collection pass.
#[derive(Debug, Clone, Default)]
pub struct CollectionPass {
    pub targets_polled: usize,
    pub totals: StatsSnapshot,
    pub weekly: Option<WeeklyStats>,
    pub alerts: Vec<Alert>,
    pub failures: Vec<(String, String)>,
}

/// Reads counters and notifications from every injected target.
pub struct StatsCollector {
    manager: Arc<ConnectionManager>,
    ledger: WeeklyLedger,
    /// Targets whose circuit-broken alert has been raised and not yet
    /// acknowledged.
    broken: Mutex<HashSet<String>>,
}

impl StatsCollector {
    pub fn new(manager: Arc<ConnectionManager>, ledger: WeeklyLedger) -> Self {
        Self {
            manager,
            ledger,
            broken: Mutex::new(HashSet::new()),
        }
    }

    pub fn ledger(&self) -> &WeeklyLedger {
        &self.ledger
    }

    /// Read and reset the payload's counters.
    pub async fn collect(&self, target_id: &str) -> Result<StatsSnapshot> {
        let value = self
            .manager
            .evaluate(target_id, &payload::stats_expression(true))
            .await?;
        if value.is_null() {
            return Ok(StatsSnapshot::default());
        }
        serde_json::from_value(value).map_err(|e| AutopilotError::Json {
            message: format!("Unexpected stats from {}: {}", target_id, e),
            source: Some(e),
        })
    }

    /// Take the payload's pending notification, if any.
    pub async fn poll_notification(&self, target_id: &str) -> Result<Option<NotificationEnvelope>> {
        let value = self
            .manager
            .evaluate(target_id, &payload::notification_expression())
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let envelope = serde_json::from_value(value).map_err(|e| AutopilotError::Json {
            message: format!("Unexpected notification from {}: {}", target_id, e),
            source: Some(e),
        })?;
        Ok(Some(envelope))
    }

    /// Clear the payload's retry-suppression state and re-arm the alert.
    ///
    /// Returns `false` when the payload is not present in the target.
    pub async fn reset_circuit(&self, target_id: &str) -> Result<bool> {
        let value = self
            .manager
            .evaluate(target_id, &payload::reset_circuit_expression())
            .await?;
        if let Ok(mut broken) = self.broken.lock() {
            broken.remove(target_id);
        }
        Ok(!payload::is_not_injected(&value))
    }

    fn raise_once(&self, target_id: &str, envelope: &NotificationEnvelope) -> Option<Alert> {
        if envelope.kind != NotificationKind::RetryCircuitBroken {
            debug!("Ignoring notification {:?} from {}", envelope.kind, target_id);
            return None;
        }
        let newly_broken = self
            .broken
            .lock()
            .map(|mut broken| broken.insert(target_id.to_string()))
            .unwrap_or(false);
        if !newly_broken {
            return None;
        }

        let message = envelope
            .payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Automation paused after repeated failures")
            .to_string();
        Some(Alert {
            target_id: target_id.to_string(),
            kind: envelope.kind.clone(),
            message,
            raised_at: Utc::now(),
        })
    }

    /// Collect from every injected target, fold into the weekly aggregate and
    /// relay notifications.
    pub async fn run_pass(&self) -> CollectionPass {
        self.run_pass_at(Local::now()).await
    }

    pub async fn run_pass_at(&self, now: DateTime<Local>) -> CollectionPass {
        let ids = self.manager.injected_ids().await;
        let polls = ids.iter().map(|id| async move {
            let stats = self.collect(id).await;
            let notification = self.poll_notification(id).await;
            (id.as_str(), stats, notification)
        });
        let results = join_all(polls).await;

        let mut pass = CollectionPass {
            targets_polled: ids.len(),
            ..CollectionPass::default()
        };

        for (id, stats, notification) in results {
            match stats {
                Ok(snapshot) => pass.totals.add(snapshot),
                Err(e) => {
                    debug!("Stats read failed for {}: {}", id, e);
                    pass.failures.push((id.to_string(), e.to_string()));
                }
            }
            match notification {
                Ok(Some(envelope)) => pass.alerts.extend(self.raise_once(id, &envelope)),
                Ok(None) => {}
                Err(e) => pass.failures.push((id.to_string(), e.to_string())),
            }
        }

        let ledger = self.ledger.clone();
        let totals = pass.totals;
        match run_blocking(move || ledger.record(totals, now)).await {
            Ok(weekly) => pass.weekly = Some(weekly),
            Err(e) => warn!("Failed to update weekly stats: {}", e),
        }

        pass
    }
}
