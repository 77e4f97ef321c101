//! Periodic synchronization of targets, gated by leadership.

use super::config::SessionConfig;
use crate::cancel::CancellationToken;
use crate::config::SchedulerConfig;
use crate::discovery::{PageDescriptor, TargetDiscovery};
use crate::election::{InstanceLock, LeaderDecision};
use crate::error::AutopilotError;
use crate::store::run_blocking;
use crate::targets::{ConnectionManager, PushAck};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Which step of a tick a per-target failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Connect,
    Bootstrap,
    Configure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFailure {
    pub target_id: String,
    pub stage: FailureStage,
    pub message: String,
}

/// What one synchronization pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub leader: bool,
    /// Current lock holder when standing by.
    pub standby_for: Option<String>,
    pub pruned: Vec<String>,
    pub discovered: usize,
    pub connect_attempts: usize,
    pub bootstrapped: Vec<String>,
    pub configured: Vec<String>,
    pub not_ready: Vec<String>,
    pub failures: Vec<TargetFailure>,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives discovery, connection, injection and configuration on a timer.
pub struct SessionCoordinator {
    manager: Arc<ConnectionManager>,
    discovery: TargetDiscovery,
    lock: InstanceLock,
    tick_interval: Duration,
    config: RwLock<SessionConfig>,
    leader: AtomicBool,
    last_report: Mutex<Option<TickReport>>,
    running: Mutex<Option<RunningLoop>>,
    /// Serializes `start` and `stop` across their await points.
    lifecycle: tokio::sync::Mutex<()>,
}

impl SessionCoordinator {
    pub fn new(
        manager: Arc<ConnectionManager>,
        discovery: TargetDiscovery,
        lock: InstanceLock,
    ) -> Self {
        Self {
            manager,
            discovery,
            lock,
            tick_interval: SchedulerConfig::TICK_INTERVAL,
            config: RwLock::new(SessionConfig::default()),
            leader: AtomicBool::new(false),
            last_report: Mutex::new(None),
            running: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn lock(&self) -> &InstanceLock {
        &self.lock
    }

    pub fn config(&self) -> SessionConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Replace the configuration; the next tick pushes it.
    pub fn update_config(&self, config: SessionConfig) {
        let config = config.normalized();
        match self.config.write() {
            Ok(mut current) => *current = config,
            Err(e) => *e.into_inner() = config,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().map(|l| !l.handle.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report.lock().ok().and_then(|r| r.clone())
    }

    /// Start the scheduler, or just replace the config if it is running.
    ///
    /// Runs one synchronization pass before returning, then ticks every
    /// `tick_interval` until [`stop`](Self::stop).
    pub async fn start(self: &Arc<Self>, config: SessionConfig) -> TickReport {
        self.update_config(config);

        let _lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            debug!("Coordinator already running; config replaced");
            return self.last_report().unwrap_or_default();
        }

        let report = self.sync_once().await;

        let token = CancellationToken::new();
        let coordinator = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let period = coordinator.tick_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        coordinator.sync_once().await;
                    }
                }
            }
            debug!("Coordinator loop exited");
        });

        match self.running.lock() {
            Ok(mut running) => *running = Some(RunningLoop { token, handle }),
            Err(_) => {
                error!("Coordinator state poisoned; stopping loop");
                token.cancel();
            }
        }
        info!(
            "Coordinator started (tick every {:?}, leader: {})",
            self.tick_interval, report.leader
        );
        report
    }

    /// Stop ticking, shut the payload down, disconnect and release the lock.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some(running) = running {
            running.token.cancel();
            if let Err(e) = running.handle.await {
                warn!("Coordinator loop ended abnormally: {}", e);
            }
        }

        self.manager.broadcast_shutdown().await;
        self.manager.disconnect_all().await;

        let lock = self.lock.clone();
        if let Err(e) = run_blocking(move || lock.release()).await {
            warn!("Failed to release leader lock: {}", e);
        }
        self.leader.store(false, Ordering::SeqCst);
        info!("Coordinator stopped");
    }

    /// Abort the timer task without the shutdown sequence of [`stop`](Self::stop).
    pub fn abort_loop(&self) {
        if let Some(running) = self.running.lock().ok().and_then(|mut r| r.take()) {
            running.token.cancel();
            running.handle.abort();
        }
    }

    /// One synchronization pass.
    pub async fn sync_once(&self) -> TickReport {
        let mut report = TickReport::default();

        let lock = self.lock.clone();
        let decision = match run_blocking(move || lock.decide()).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Leader election failed, standing by: {}", e);
                LeaderDecision::Standby {
                    owner_id: String::new(),
                }
            }
        };

        let was_leader = self.leader.swap(decision.is_leader(), Ordering::SeqCst);
        match &decision {
            LeaderDecision::Standby { owner_id } => {
                if was_leader {
                    info!("Lost leadership to {}; releasing targets", owner_id);
                    self.manager.disconnect_all().await;
                }
                report.standby_for = Some(owner_id.clone()).filter(|o| !o.is_empty());
                self.store_report(&report);
                return report;
            }
            LeaderDecision::Acquired if !was_leader => info!("Became leader"),
            _ => {}
        }
        report.leader = true;

        report.pruned = self.manager.prune_closed().await;

        let pages = dedupe_pages(
            self.discovery
                .scan()
                .await
                .into_iter()
                .flat_map(|port| port.pages),
        );
        report.discovered = pages.len();

        let mut fresh = Vec::new();
        for page in &pages {
            if !self.manager.is_connected(&page.id).await {
                fresh.push(page);
            }
        }
        report.connect_attempts = fresh.len();
        let connects = fresh.iter().map(|page| async move {
            (page.id.clone(), self.manager.connect(page).await)
        });
        for (id, connected) in join_all(connects).await {
            if !connected {
                report.failures.push(TargetFailure {
                    target_id: id,
                    stage: FailureStage::Connect,
                    message: "could not open control connection".to_string(),
                });
            }
        }

        let config = self.config();
        let ids = self.manager.connected_ids().await;
        let syncs = ids.iter().map(|id| self.sync_target(id, &config));
        for outcome in join_all(syncs).await {
            match outcome {
                TargetOutcome::Configured { id, bootstrapped } => {
                    if bootstrapped {
                        report.bootstrapped.push(id.clone());
                    }
                    report.configured.push(id);
                }
                TargetOutcome::NotReady { id, bootstrapped } => {
                    if bootstrapped {
                        report.bootstrapped.push(id.clone());
                    }
                    report.not_ready.push(id);
                }
                TargetOutcome::Failed(failure) => report.failures.push(failure),
            }
        }

        if !report.failures.is_empty() {
            debug!("Tick finished with {} failure(s)", report.failures.len());
        }
        self.store_report(&report);
        report
    }

    async fn sync_target(&self, id: &str, config: &SessionConfig) -> TargetOutcome {
        let bootstrapped = match self.manager.ensure_bootstrapped(id).await {
            Ok(injected_now) => injected_now,
            Err(e) => {
                log_failure(id, FailureStage::Bootstrap, &e);
                return TargetOutcome::Failed(TargetFailure {
                    target_id: id.to_string(),
                    stage: FailureStage::Bootstrap,
                    message: e.to_string(),
                });
            }
        };

        match self.manager.push_config(id, config).await {
            Ok(PushAck::Applied(_)) => TargetOutcome::Configured {
                id: id.to_string(),
                bootstrapped,
            },
            Ok(PushAck::NotReady) => TargetOutcome::NotReady {
                id: id.to_string(),
                bootstrapped,
            },
            Err(e) => {
                log_failure(id, FailureStage::Configure, &e);
                TargetOutcome::Failed(TargetFailure {
                    target_id: id.to_string(),
                    stage: FailureStage::Configure,
                    message: e.to_string(),
                })
            }
        }
    }

    fn store_report(&self, report: &TickReport) {
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
    }
}

enum TargetOutcome {
    Configured { id: String, bootstrapped: bool },
    NotReady { id: String, bootstrapped: bool },
    Failed(TargetFailure),
}

/// Transient failures are expected to clear on the next tick.
fn log_failure(id: &str, stage: FailureStage, err: &AutopilotError) {
    if err.is_retryable() {
        debug!("{:?} of {} failed, retrying next tick: {}", stage, id, err);
    } else {
        warn!("{:?} of {} failed: {}", stage, id, err);
    }
}

/// Keep the first descriptor for each page id.
fn dedupe_pages(pages: impl IntoIterator<Item = PageDescriptor>) -> Vec<PageDescriptor> {
    let mut seen = HashSet::new();
    pages
        .into_iter()
        .filter(|page| seen.insert(page.id.clone()))
        .collect()
}
