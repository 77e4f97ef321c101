//! The per-process supervisor.
//!
//! A `Supervisor` owns every piece of mutable state for one process: the
//! connection table, the scheduler, the stats loop and the alert channel.
//! Construct one with [`Supervisor::builder`], then `start` it.

mod builder;

pub use builder::SupervisorBuilder;

use crate::cancel::CancellationToken;
use crate::config::IdeKind;
use crate::discovery::{DiscoveredPort, TargetDiscovery};
use crate::election::{read_lock, LockRecord};
use crate::error::Result;
use crate::session::{SessionConfig, SessionCoordinator, TickReport};
use crate::stats::{Alert, CollectionPass, StatsCollector, WeeklyStats};
use crate::store::{KeyValueStore, StoreKeys};
use crate::targets::{ConnectionManager, Payload, TargetInfo};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Point-in-time view of a supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub instance_id: String,
    pub ide: IdeKind,
    pub running: bool,
    pub leader: bool,
    pub lock: Option<LockRecord>,
    pub last_tick: Option<TickReport>,
    pub targets: Vec<TargetInfo>,
}

struct StatsLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Discovers IDE targets and keeps the automation payload running in them.
pub struct Supervisor {
    ide: IdeKind,
    instance_id: String,
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    discovery: TargetDiscovery,
    manager: Arc<ConnectionManager>,
    coordinator: Arc<SessionCoordinator>,
    collector: Arc<StatsCollector>,
    stats_interval: Duration,
    stats_loop: Mutex<Option<StatsLoop>>,
    alerts_tx: mpsc::UnboundedSender<Alert>,
    alerts_rx: Mutex<Option<mpsc::UnboundedReceiver<Alert>>>,
}

impl Supervisor {
    pub fn builder(ide: IdeKind, payload: Payload) -> SupervisorBuilder {
        SupervisorBuilder::new(ide, payload)
    }

    pub fn ide(&self) -> IdeKind {
        self.ide
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Whether any IDE window is reachable on the debugging port range.
    ///
    /// Only scans; never starts automation.
    pub async fn is_available(&self) -> bool {
        self.discovery.is_available().await
    }

    /// One discovery scan over the configured range.
    pub async fn scan(&self) -> Vec<DiscoveredPort> {
        self.discovery.scan().await
    }

    /// Start automation, or replace the config if already running.
    ///
    /// Runs one synchronization pass immediately and returns its report.
    pub async fn start(&self, config: SessionConfig) -> TickReport {
        let config = if config.ide_kind != self.ide {
            debug!(
                "Config names {} but supervisor drives {}; using {}",
                config.ide_kind, self.ide, self.ide
            );
            SessionConfig {
                ide_kind: self.ide,
                ..config
            }
        } else {
            config
        };

        let report = self.coordinator.start(config).await;
        self.start_stats_loop();
        report
    }

    /// Replace the session config; pushed on the next tick.
    pub fn update_config(&self, config: SessionConfig) {
        self.coordinator.update_config(SessionConfig {
            ide_kind: self.ide,
            ..config
        });
    }

    pub fn config(&self) -> SessionConfig {
        self.coordinator.config()
    }

    /// Run one synchronization pass now, outside the timer.
    pub async fn sync_now(&self) -> TickReport {
        self.coordinator.sync_once().await
    }

    /// Stop both loops, stop the payload, disconnect and release the lock.
    pub async fn stop(&self) {
        let stats_loop = self.stats_loop.lock().ok().and_then(|mut l| l.take());
        if let Some(stats_loop) = stats_loop {
            stats_loop.token.cancel();
            if let Err(e) = stats_loop.handle.await {
                warn!("Stats loop ended abnormally: {}", e);
            }
        }
        self.coordinator.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.coordinator.is_running()
    }

    pub fn is_leader(&self) -> bool {
        self.coordinator.is_leader()
    }

    fn start_stats_loop(&self) {
        let Ok(mut slot) = self.stats_loop.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let collector = self.collector.clone();
        let alerts = self.alerts_tx.clone();
        let period = self.stats_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let pass = collector.run_pass().await;
                        forward_alerts(&alerts, &pass);
                    }
                }
            }
        });

        *slot = Some(StatsLoop { token, handle });
        debug!("Stats loop started (every {:?})", period);
    }

    /// Take the alert receiver. Returns `None` after the first call.
    pub fn take_alerts(&self) -> Option<mpsc::UnboundedReceiver<Alert>> {
        self.alerts_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Run a stats pass now. Alerts are also sent to the alert channel.
    pub async fn collect_stats_now(&self) -> CollectionPass {
        let pass = self.collector.run_pass().await;
        forward_alerts(&self.alerts_tx, &pass);
        pass
    }

    /// Acknowledge a circuit-broken alert: reset the payload's retry state.
    pub async fn acknowledge_alert(&self, target_id: &str) -> Result<bool> {
        let reset = self.collector.reset_circuit(target_id).await?;
        info!("Acknowledged alert for target {}", target_id);
        Ok(reset)
    }

    /// This week's totals (performing rollover if due).
    pub fn weekly_stats(&self) -> Result<WeeklyStats> {
        self.collector.ledger().load(Local::now())
    }

    /// Last week's totals, returned once after a rollover.
    pub fn take_last_week(&self) -> Result<Option<WeeklyStats>> {
        self.collector.ledger().take_last_week()
    }

    /// Record that the user asked for automation before the IDE was relaunched
    /// with its debugging port.
    pub fn set_pending_enable(&self, pending: bool) -> Result<()> {
        if pending {
            self.store.set(&self.keys.pending_enable, "true")
        } else {
            self.store.remove(&self.keys.pending_enable)
        }
    }

    /// Consume the pending-enable flag.
    pub fn take_pending_enable(&self) -> Result<bool> {
        let pending = self
            .store
            .get(&self.keys.pending_enable)?
            .is_some_and(|v| v == "true");
        if pending {
            self.store.remove(&self.keys.pending_enable)?;
        }
        Ok(pending)
    }

    pub async fn status(&self) -> SupervisorStatus {
        let lock = match read_lock(self.store.as_ref(), &self.keys) {
            Ok(lock) => lock,
            Err(e) => {
                warn!("Failed to read lock record: {}", e);
                None
            }
        };
        SupervisorStatus {
            instance_id: self.instance_id.clone(),
            ide: self.ide,
            running: self.is_running(),
            leader: self.is_leader(),
            lock,
            last_tick: self.coordinator.last_report(),
            targets: self.manager.targets().await,
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(stats_loop) = self.stats_loop.lock().ok().and_then(|mut l| l.take()) {
            stats_loop.token.cancel();
            stats_loop.handle.abort();
        }
        self.coordinator.abort_loop();
    }
}

fn forward_alerts(alerts: &mpsc::UnboundedSender<Alert>, pass: &CollectionPass) {
    for alert in &pass.alerts {
        warn!("Target {}: {}", alert.target_id, alert.message);
        // No receiver is fine; alerts are also logged.
        let _ = alerts.send(alert.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn supervisor(store: &MemoryStore) -> Supervisor {
        let port = closed_port().await;
        Supervisor::builder(IdeKind::Antigravity, Payload::new("1"))
            .store(Arc::new(store.clone()))
            .port_range(port, port)
            .tick_interval(Duration::from_millis(50))
            .stats_interval(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_pending_enable_is_consumed_once() {
        let store = MemoryStore::new();
        let supervisor = supervisor(&store).await;

        assert!(!supervisor.take_pending_enable().unwrap());
        supervisor.set_pending_enable(true).unwrap();
        assert_eq!(
            store.get("antigravity.pending_enable").unwrap().as_deref(),
            Some("true")
        );
        assert!(supervisor.take_pending_enable().unwrap());
        assert!(!supervisor.take_pending_enable().unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_when_nothing_listens() {
        let store = MemoryStore::new();
        let supervisor = supervisor(&store).await;
        assert!(!supervisor.is_available().await);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_start_forces_own_ide_and_stop_cleans_up() {
        let store = MemoryStore::new();
        let supervisor = supervisor(&store).await;

        let report = supervisor
            .start(SessionConfig::for_ide(IdeKind::Cursor))
            .await;
        assert!(report.leader);
        assert_eq!(supervisor.config().ide_kind, IdeKind::Antigravity);

        let status = supervisor.status().await;
        assert!(status.running);
        assert_eq!(
            status.lock.map(|l| l.owner_id),
            Some(supervisor.instance_id().to_string())
        );

        supervisor.stop().await;
        assert!(!supervisor.is_running());
        assert!(supervisor.status().await.lock.is_none());
    }

    #[tokio::test]
    async fn test_alert_receiver_taken_once() {
        let store = MemoryStore::new();
        let supervisor = supervisor(&store).await;
        assert!(supervisor.take_alerts().is_some());
        assert!(supervisor.take_alerts().is_none());
    }

    #[tokio::test]
    async fn test_weekly_stats_start_empty() {
        let store = MemoryStore::new();
        let supervisor = supervisor(&store).await;
        let pass = supervisor.collect_stats_now().await;
        assert_eq!(pass.targets_polled, 0);
        assert_eq!(supervisor.weekly_stats().unwrap().clicks, 0);
        assert!(supervisor.take_last_week().unwrap().is_none());
    }
}
