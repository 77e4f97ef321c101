//! Builder for configuring a Supervisor.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::Supervisor;
use crate::config::{DiscoveryConfig, ElectionConfig, IdeKind, RpcConfig, SchedulerConfig};
use crate::discovery::TargetDiscovery;
use crate::election::{generate_instance_id, InstanceLock};
use crate::error::{AutopilotError, Result};
use crate::session::SessionCoordinator;
use crate::stats::{StatsCollector, WeeklyLedger};
use crate::store::{KeyValueStore, SqliteStore, StoreKeys};
use crate::targets::{ConnectionManager, Payload};

/// Builder for a per-process [`Supervisor`].
///
/// # Example
///
/// ```rust,ignore
/// use autopilot_core::{IdeKind, Payload, Supervisor};
///
/// let supervisor = Supervisor::builder(IdeKind::Cursor, Payload::from_file(path)?)
///     .port_range(9222, 9232)
///     .tick_interval(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct SupervisorBuilder {
    ide: IdeKind,
    payload: Payload,
    store: Option<Arc<dyn KeyValueStore>>,
    instance_id: Option<String>,
    port_start: u16,
    port_end: u16,
    tick_interval: Duration,
    stats_interval: Duration,
    rpc_timeout: Duration,
    connect_timeout: Duration,
    stale_after: Duration,
}

impl SupervisorBuilder {
    pub fn new(ide: IdeKind, payload: Payload) -> Self {
        Self {
            ide,
            payload,
            store: None,
            instance_id: None,
            port_start: DiscoveryConfig::DEFAULT_PORT_START,
            port_end: DiscoveryConfig::DEFAULT_PORT_END,
            tick_interval: SchedulerConfig::TICK_INTERVAL,
            stats_interval: SchedulerConfig::STATS_INTERVAL,
            rpc_timeout: RpcConfig::CALL_TIMEOUT,
            connect_timeout: RpcConfig::CONNECT_TIMEOUT,
            stale_after: ElectionConfig::STALE_AFTER,
        }
    }

    /// Use a specific shared store.
    ///
    /// Default: the SQLite database under the user config directory.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fix the instance id used for leader election.
    ///
    /// Default: a random UUID per process.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Inclusive debugging-port range to scan.
    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.port_start = start;
        self.port_end = end;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// How long a leader's heartbeat may age before another process takes over.
    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Build the supervisor. Nothing runs until [`Supervisor::start`].
    ///
    /// Fails with a validation error when either timer interval is zero.
    pub fn build(self) -> Result<Supervisor> {
        ensure_nonzero("tick_interval", self.tick_interval)?;
        ensure_nonzero("stats_interval", self.stats_interval)?;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::open()?),
        };
        let keys = StoreKeys::for_ide(self.ide);
        let instance_id = self.instance_id.unwrap_or_else(generate_instance_id);

        let discovery = TargetDiscovery::with_range(self.port_start, self.port_end)?;
        let manager = Arc::new(
            ConnectionManager::new(self.payload)
                .with_timeouts(self.rpc_timeout, self.connect_timeout),
        );
        let lock = InstanceLock::new(store.clone(), keys.clone(), instance_id.clone())
            .with_stale_after(self.stale_after);
        let coordinator = Arc::new(
            SessionCoordinator::new(manager.clone(), discovery.clone(), lock)
                .with_tick_interval(self.tick_interval),
        );
        let collector = Arc::new(StatsCollector::new(
            manager.clone(),
            WeeklyLedger::new(store.clone(), keys.clone()),
        ));
        let (alerts_tx, alerts_rx) = mpsc::unbounded_channel();

        Ok(Supervisor {
            ide: self.ide,
            instance_id,
            store,
            keys,
            discovery,
            manager,
            coordinator,
            collector,
            stats_interval: self.stats_interval,
            stats_loop: Mutex::new(None),
            alerts_tx,
            alerts_rx: Mutex::new(Some(alerts_rx)),
        })
    }
}

fn ensure_nonzero(field: &str, interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(AutopilotError::Validation {
            field: field.to_string(),
            message: "interval must be greater than zero".to_string(),
        });
    }
    Ok(())
}
