//! Connection manager: one control connection per target page.
//!
//! The manager exclusively owns every [`Target`]. It knows whether each one
//! has had the payload injected and whether its last configuration push was
//! acknowledged, and it guarantees a target is never injected twice without an
//! intervening disconnect.

use super::payload::{self, Payload};
use crate::cdp::{evaluate_outcome, evaluate_params, Connection};
use crate::config::RpcConfig;
use crate::discovery::PageDescriptor;
use crate::session::SessionConfig;
use crate::{AutopilotError, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Lifecycle state of a target as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Connecting,
    /// Transport up; payload not yet injected and configured.
    Connected,
    /// Injected, and the last configuration push was acknowledged.
    Ready,
}

/// Snapshot of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    pub endpoint_url: String,
    pub state: TargetState,
    pub injected: bool,
}

/// Result of a configuration push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAck {
    /// The payload accepted the configuration and answered with this text.
    Applied(String),
    /// The target is unknown or not injected; nothing was sent.
    NotReady,
}

/// A connected target page.
pub struct Target {
    pub id: String,
    pub endpoint_url: String,
    connection: Connection,
    injected: AtomicBool,
    configured: AtomicBool,
    bootstrap_lock: tokio::sync::Mutex<()>,
}

impl Target {
    pub fn injected(&self) -> bool {
        self.injected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TargetState {
        if self.injected() && self.configured.load(Ordering::SeqCst) {
            TargetState::Ready
        } else {
            TargetState::Connected
        }
    }

    fn mark_not_injected(&self) {
        self.injected.store(false, Ordering::SeqCst);
        self.configured.store(false, Ordering::SeqCst);
    }

    fn info(&self) -> TargetInfo {
        TargetInfo {
            id: self.id.clone(),
            endpoint_url: self.endpoint_url.clone(),
            state: self.state(),
            injected: self.injected(),
        }
    }
}

type ConnectWaiters = HashMap<String, (String, watch::Receiver<Option<bool>>)>;

/// Owns every live target connection.
pub struct ConnectionManager {
    payload: Payload,
    targets: RwLock<HashMap<String, Arc<Target>>>,
    connecting: Mutex<ConnectWaiters>,
    rpc_timeout: Duration,
    connect_timeout: Duration,
}

/// Clears a connect-in-progress marker even if the connecting future is dropped.
struct ConnectingGuard<'a> {
    connecting: &'a Mutex<ConnectWaiters>,
    id: String,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut connecting) = self.connecting.lock() {
            connecting.remove(&self.id);
        }
    }
}

impl ConnectionManager {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            targets: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            rpc_timeout: RpcConfig::CALL_TIMEOUT,
            connect_timeout: RpcConfig::CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, rpc_timeout: Duration, connect_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    async fn get(&self, target_id: &str) -> Option<Arc<Target>> {
        self.targets.read().await.get(target_id).cloned()
    }

    async fn require(&self, target_id: &str) -> Result<Arc<Target>> {
        self.get(target_id)
            .await
            .ok_or_else(|| AutopilotError::TargetNotFound {
                target_id: target_id.to_string(),
            })
    }

    /// Whether a live (not closed) connection exists for `target_id`.
    pub async fn is_connected(&self, target_id: &str) -> bool {
        self.get(target_id)
            .await
            .map(|t| !t.connection.is_closed())
            .unwrap_or(false)
    }

    /// Connect to a discovered page.
    ///
    /// Returns `true` once the transport is up, `false` if it could not be
    /// opened. Already-live ids return `true` without reconnecting; concurrent
    /// connects for one id share a single attempt.
    pub async fn connect(&self, page: &PageDescriptor) -> bool {
        let Some(url) = page.control_url() else {
            debug!("Page {} has no control URL; not connecting", page.id);
            return false;
        };

        if self.is_connected(&page.id).await {
            return true;
        }

        let claim = {
            let mut connecting = match self.connecting.lock() {
                Ok(guard) => guard,
                Err(_) => return false,
            };
            match connecting.get(&page.id) {
                Some((_, rx)) => Err(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    connecting.insert(page.id.clone(), (url.to_string(), rx));
                    Ok(tx)
                }
            }
        };

        let tx = match claim {
            Ok(tx) => tx,
            Err(mut rx) => {
                return rx
                    .wait_for(|outcome| outcome.is_some())
                    .await
                    .map(|outcome| *outcome == Some(true))
                    .unwrap_or(false);
            }
        };
        let _guard = ConnectingGuard {
            connecting: &self.connecting,
            id: page.id.clone(),
        };

        let connected = match Connection::open(&page.id, url, self.connect_timeout).await {
            Ok(connection) => {
                let target = Arc::new(Target {
                    id: page.id.clone(),
                    endpoint_url: url.to_string(),
                    connection,
                    injected: AtomicBool::new(false),
                    configured: AtomicBool::new(false),
                    bootstrap_lock: tokio::sync::Mutex::new(()),
                });
                // A stale closed entry for the same id is replaced here.
                self.targets.write().await.insert(page.id.clone(), target);
                info!("Connected to target {} ({})", page.id, page.title);
                true
            }
            Err(e) => {
                warn!("Failed to connect to target {}: {}", page.id, e);
                false
            }
        };

        let _ = tx.send(Some(connected));
        connected
    }

    /// Inject the payload unless it already is.
    ///
    /// Returns `Ok(true)` when this call performed the injection and
    /// `Ok(false)` when the target was already injected (no evaluation
    /// issued). A remote exception leaves the target un-injected so the next
    /// tick retries.
    pub async fn ensure_bootstrapped(&self, target_id: &str) -> Result<bool> {
        let target = self.require(target_id).await?;
        if target.injected() {
            return Ok(false);
        }

        let _serialized = target.bootstrap_lock.lock().await;
        if target.injected() {
            return Ok(false);
        }

        match self.evaluate_on(&target, self.payload.script()).await {
            Ok(_) => {
                target.injected.store(true, Ordering::SeqCst);
                info!("Injected payload into target {}", target_id);
                Ok(true)
            }
            Err(e) => {
                warn!("Bootstrap failed for target {}: {}", target_id, e);
                Err(e)
            }
        }
    }

    /// Push the session configuration to an injected target.
    pub async fn push_config(&self, target_id: &str, config: &SessionConfig) -> Result<PushAck> {
        let Some(target) = self.get(target_id).await else {
            return Ok(PushAck::NotReady);
        };
        if !target.injected() {
            return Ok(PushAck::NotReady);
        }

        let expression = payload::start_expression(&config.to_wire())?;
        let value = match self.evaluate_on(&target, &expression).await {
            Ok(value) => value,
            Err(e) => {
                target.configured.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        if payload::is_not_injected(&value) {
            info!(
                "Payload missing in target {} (page reloaded); will re-inject",
                target_id
            );
            target.mark_not_injected();
            return Ok(PushAck::NotReady);
        }

        target.configured.store(true, Ordering::SeqCst);
        let ack = match value {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        debug!("Target {} acknowledged config: {}", target_id, ack);
        Ok(PushAck::Applied(ack))
    }

    /// Issue a raw command on a target's connection.
    pub async fn call(
        &self,
        target_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let target = self.require(target_id).await?;
        target.connection.call(method, params, timeout).await
    }

    /// Evaluate an expression in a target and return its value.
    pub async fn evaluate(&self, target_id: &str, expression: &str) -> Result<Value> {
        let target = self.require(target_id).await?;
        self.evaluate_on(&target, expression).await
    }

    async fn evaluate_on(&self, target: &Target, expression: &str) -> Result<Value> {
        let result = target
            .connection
            .call(
                RpcConfig::EVALUATE_METHOD,
                evaluate_params(expression),
                self.rpc_timeout,
            )
            .await?;
        evaluate_outcome(&result).map_err(|message| AutopilotError::RemoteEvaluation {
            target_id: target.id.clone(),
            message,
        })
    }

    /// Best-effort `stop()` on every injected target. Errors are ignored.
    pub async fn broadcast_shutdown(&self) {
        let injected: Vec<Arc<Target>> = self
            .targets
            .read()
            .await
            .values()
            .filter(|t| t.injected())
            .cloned()
            .collect();

        let stops = injected.iter().map(|target| async move {
            if let Err(e) = self.evaluate_on(target, &payload::stop_expression()).await {
                debug!("Stop on {} failed (ignored): {}", target.id, e);
            }
        });
        join_all(stops).await;
    }

    /// Close every connection and forget every target.
    pub async fn disconnect_all(&self) {
        let drained: Vec<Arc<Target>> = self.targets.write().await.drain().map(|(_, t)| t).collect();
        for target in &drained {
            target.connection.close();
        }
        if !drained.is_empty() {
            info!("Disconnected {} target(s)", drained.len());
        }
    }

    /// Drop targets whose transport has closed. Returns the removed ids.
    pub async fn prune_closed(&self) -> Vec<String> {
        let mut targets = self.targets.write().await;
        let closed: Vec<String> = targets
            .iter()
            .filter(|(_, t)| t.connection.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &closed {
            targets.remove(id);
            debug!("Pruned closed target {}", id);
        }
        closed
    }

    /// Snapshot of connected and connecting targets.
    pub async fn targets(&self) -> Vec<TargetInfo> {
        let mut infos: Vec<TargetInfo> = self
            .targets
            .read()
            .await
            .values()
            .map(|t| t.info())
            .collect();

        if let Ok(connecting) = self.connecting.lock() {
            for (id, (url, _)) in connecting.iter() {
                if !infos.iter().any(|info| &info.id == id) {
                    infos.push(TargetInfo {
                        id: id.clone(),
                        endpoint_url: url.clone(),
                        state: TargetState::Connecting,
                        injected: false,
                    });
                }
            }
        }

        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Ids of every live target.
    pub async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .targets
            .read()
            .await
            .values()
            .filter(|t| !t.connection.is_closed())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of every live, injected target.
    pub async fn injected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .targets
            .read()
            .await
            .values()
            .filter(|t| t.injected() && !t.connection.is_closed())
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }
}
