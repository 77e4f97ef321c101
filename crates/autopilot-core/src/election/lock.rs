//! Heartbeat lock over the shared store.
//!
//! The lock is two keys: the owner's instance id and the owner's last
//! heartbeat in epoch milliseconds. Reading and writing them are separate
//! store operations, so two processes that both see a stale lock can both
//! claim it; the later write wins and the other process sees `Standby` on its
//! next tick. A few seconds of double leadership is accepted.

use crate::config::ElectionConfig;
use crate::store::{KeyValueStore, StoreKeys};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The persisted lock, as last read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub owner_id: String,
    /// Epoch milliseconds of the owner's last renewal.
    pub heartbeat_at: i64,
}

impl LockRecord {
    /// Whether the owner has missed its renewal window at `now_ms`.
    ///
    /// A heartbeat in the future (clock skew between processes) counts as fresh.
    pub fn is_stale(&self, now_ms: i64, stale_after: Duration) -> bool {
        let age = now_ms.saturating_sub(self.heartbeat_at);
        age > stale_after.as_millis() as i64
    }
}

/// Outcome of one election attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderDecision {
    /// The lock was absent, unreadable or stale and is now ours.
    Acquired,
    /// We already held it; the heartbeat was refreshed.
    Renewed,
    /// Someone else holds a fresh lock.
    Standby { owner_id: String },
}

impl LeaderDecision {
    pub fn is_leader(&self) -> bool {
        matches!(self, LeaderDecision::Acquired | LeaderDecision::Renewed)
    }
}

/// Read the lock record. Missing or unparseable halves read as no lock.
pub fn read_lock(store: &dyn KeyValueStore, keys: &StoreKeys) -> Result<Option<LockRecord>> {
    let owner = store.get(&keys.lock_owner)?.filter(|o| !o.trim().is_empty());
    let heartbeat = store
        .get(&keys.lock_heartbeat)?
        .and_then(|raw| raw.trim().parse::<i64>().ok());

    Ok(match (owner, heartbeat) {
        (Some(owner_id), Some(heartbeat_at)) => Some(LockRecord {
            owner_id,
            heartbeat_at,
        }),
        _ => None,
    })
}

fn write_lock(
    store: &dyn KeyValueStore,
    keys: &StoreKeys,
    owner_id: &str,
    now_ms: i64,
) -> Result<()> {
    store.set(&keys.lock_owner, owner_id)?;
    store.set(&keys.lock_heartbeat, &now_ms.to_string())
}

/// Acquire, renew, or defer to the current lock holder.
pub fn try_acquire_or_renew(
    store: &dyn KeyValueStore,
    keys: &StoreKeys,
    self_id: &str,
    stale_after: Duration,
    now_ms: i64,
) -> Result<LeaderDecision> {
    match read_lock(store, keys)? {
        Some(record) if record.owner_id == self_id => {
            store.set(&keys.lock_heartbeat, &now_ms.to_string())?;
            Ok(LeaderDecision::Renewed)
        }
        Some(record) if !record.is_stale(now_ms, stale_after) => Ok(LeaderDecision::Standby {
            owner_id: record.owner_id,
        }),
        previous => {
            if let Some(record) = previous {
                info!(
                    "Taking over stale lock from {} (last heartbeat {} ms ago)",
                    record.owner_id,
                    now_ms - record.heartbeat_at
                );
            }
            write_lock(store, keys, self_id, now_ms)?;
            Ok(LeaderDecision::Acquired)
        }
    }
}

/// Per-process handle on the election for one IDE namespace.
#[derive(Clone)]
pub struct InstanceLock {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    self_id: String,
    stale_after: Duration,
}

impl InstanceLock {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StoreKeys, self_id: impl Into<String>) -> Self {
        Self {
            store,
            keys,
            self_id: self_id.into(),
            stale_after: ElectionConfig::STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Run one election round against the wall clock.
    pub fn decide(&self) -> Result<LeaderDecision> {
        let decision = try_acquire_or_renew(
            self.store.as_ref(),
            &self.keys,
            &self.self_id,
            self.stale_after,
            Utc::now().timestamp_millis(),
        )?;
        debug!("Election for {}: {:?}", self.self_id, decision);
        Ok(decision)
    }

    /// Run one election round; `true` if this process is now the leader.
    pub fn try_acquire_or_renew(&self) -> Result<bool> {
        Ok(self.decide()?.is_leader())
    }

    pub fn current(&self) -> Result<Option<LockRecord>> {
        read_lock(self.store.as_ref(), &self.keys)
    }

    /// Clear the lock if this process owns it. Returns whether it did.
    pub fn release(&self) -> Result<bool> {
        match self.current()? {
            Some(record) if record.owner_id == self.self_id => {
                self.store.remove(&self.keys.lock_owner)?;
                self.store.remove(&self.keys.lock_heartbeat)?;
                info!("Released leader lock held by {}", self.self_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl std::fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLock")
            .field("self_id", &self.self_id)
            .field("keys", &self.keys)
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

/// A fresh random instance id.
pub fn generate_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdeKind;
    use crate::store::MemoryStore;

    const STALE: Duration = Duration::from_millis(10_000);

    fn setup() -> (MemoryStore, StoreKeys) {
        (MemoryStore::new(), StoreKeys::for_ide(IdeKind::Cursor))
    }

    #[test]
    fn test_empty_store_acquires() {
        let (store, keys) = setup();
        let decision = try_acquire_or_renew(&store, &keys, "a", STALE, 1_000).unwrap();
        assert_eq!(decision, LeaderDecision::Acquired);
        assert_eq!(
            read_lock(&store, &keys).unwrap(),
            Some(LockRecord {
                owner_id: "a".into(),
                heartbeat_at: 1_000
            })
        );
    }

    #[test]
    fn test_owner_renews() {
        let (store, keys) = setup();
        try_acquire_or_renew(&store, &keys, "a", STALE, 1_000).unwrap();
        let decision = try_acquire_or_renew(&store, &keys, "a", STALE, 6_000).unwrap();
        assert_eq!(decision, LeaderDecision::Renewed);
        assert_eq!(read_lock(&store, &keys).unwrap().unwrap().heartbeat_at, 6_000);
    }

    #[test]
    fn test_other_process_stands_by_until_stale() {
        let (store, keys) = setup();
        try_acquire_or_renew(&store, &keys, "a", STALE, 0).unwrap();

        assert_eq!(
            try_acquire_or_renew(&store, &keys, "b", STALE, 10_000).unwrap(),
            LeaderDecision::Standby {
                owner_id: "a".into()
            }
        );
        assert_eq!(
            try_acquire_or_renew(&store, &keys, "b", STALE, 10_001).unwrap(),
            LeaderDecision::Acquired
        );
        assert_eq!(
            try_acquire_or_renew(&store, &keys, "a", STALE, 10_002).unwrap(),
            LeaderDecision::Standby {
                owner_id: "b".into()
            }
        );
    }

    #[test]
    fn test_future_heartbeat_is_fresh() {
        let (store, keys) = setup();
        try_acquire_or_renew(&store, &keys, "a", STALE, 50_000).unwrap();
        let decision = try_acquire_or_renew(&store, &keys, "b", STALE, 1_000).unwrap();
        assert!(!decision.is_leader());
    }

    #[test]
    fn test_unparseable_lock_is_taken() {
        let (store, keys) = setup();
        store.set(&keys.lock_owner, "a").unwrap();
        store.set(&keys.lock_heartbeat, "yesterday").unwrap();
        assert_eq!(
            try_acquire_or_renew(&store, &keys, "b", STALE, 1).unwrap(),
            LeaderDecision::Acquired
        );
    }

    #[test]
    fn test_instance_lock_release_only_by_owner() {
        let store = Arc::new(MemoryStore::new());
        let keys = StoreKeys::for_ide(IdeKind::Windsurf);
        let a = InstanceLock::new(store.clone(), keys.clone(), "a");
        let b = InstanceLock::new(store.clone(), keys, "b");

        assert!(a.try_acquire_or_renew().unwrap());
        assert!(!b.try_acquire_or_renew().unwrap());

        assert!(!b.release().unwrap());
        assert_eq!(a.current().unwrap().unwrap().owner_id, "a");

        assert!(a.release().unwrap());
        assert!(a.current().unwrap().is_none());
        assert!(b.try_acquire_or_renew().unwrap());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_instance_id(), generate_instance_id());
    }
}
