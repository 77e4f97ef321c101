//! Request/response correlation for one connection.
//!
//! Settlement is the act of removing an entry from the pending table under its
//! lock. Whichever path removes it (matching response, deadline, caller drop,
//! connection close) owns the single settlement; every other path finds the
//! entry gone and does nothing.

use super::protocol::Frame;
use crate::{AutopilotError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

type Settle = oneshot::Sender<Result<Value>>;

struct PendingCall {
    method: String,
    timeout: Duration,
    deadline: Instant,
    tx: Settle,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<u64, PendingCall>,
    /// Set once the connection is gone; new registrations are refused.
    closed: Option<String>,
}

/// Pending-call table plus the id allocator for one connection.
pub struct Correlator {
    target_id: String,
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
}

/// A registered call awaiting settlement.
#[derive(Debug)]
pub struct PendingHandle {
    pub id: u64,
    pub rx: oneshot::Receiver<Result<Value>>,
}

impl Correlator {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            next_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        // A poisoned table still holds consistent entries: every mutation is a
        // single insert or remove.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a fresh id and register a pending call under it.
    pub fn register(&self, method: &str, timeout: Duration) -> Result<PendingHandle> {
        let mut table = self.lock();
        if let Some(reason) = &table.closed {
            return Err(AutopilotError::ConnectionClosed {
                target_id: self.target_id.clone(),
                reason: reason.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        table.calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                timeout,
                deadline: Instant::now() + timeout,
                tx,
            },
        );
        Ok(PendingHandle { id, rx })
    }

    /// Settle the call a response frame answers.
    ///
    /// Returns `false` for frames that are not responses or whose id is no
    /// longer pending (late or unknown); those are discarded.
    pub fn settle(&self, frame: Frame) -> bool {
        let Some(id) = frame.response_id() else {
            return false;
        };

        let entry = self.lock().calls.remove(&id);
        match (entry, frame.into_outcome()) {
            (Some(call), Some(outcome)) => {
                // The receiver may already be gone; the entry is removed either way.
                let _ = call.tx.send(outcome);
                true
            }
            _ => {
                debug!(
                    "Discarding response for unknown call id {} on target {}",
                    id, self.target_id
                );
                false
            }
        }
    }

    /// Remove a call without delivering anything to it.
    ///
    /// Used by a caller whose own deadline elapsed or who stopped waiting.
    /// Returns `true` if this removed the entry, `false` if something else
    /// already settled it.
    pub fn expire(&self, id: u64) -> bool {
        self.lock().calls.remove(&id).is_some()
    }

    /// Reject every call whose deadline has passed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<(u64, PendingCall)> = {
            let mut table = self.lock();
            let ids: Vec<u64> = table
                .calls
                .iter()
                .filter(|(_, call)| call.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| table.calls.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = expired.len();
        for (id, call) in expired {
            debug!("Sweeping expired call {} ({}) on {}", id, call.method, self.target_id);
            let _ = call.tx.send(Err(AutopilotError::RpcTimeout {
                target_id: self.target_id.clone(),
                method: call.method,
                timeout: call.timeout,
            }));
        }
        count
    }

    /// Reject every pending call and refuse new ones.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingCall> = {
            let mut table = self.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.calls.drain().map(|(_, call)| call).collect()
        };

        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(AutopilotError::ConnectionClosed {
                target_id: self.target_id.clone(),
                reason: reason.to_string(),
            }));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn closed_reason(&self) -> Option<String> {
        self.lock().closed.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }
}

/// Removes its call from the table when dropped, unless disarmed.
///
/// Covers callers that are cancelled mid-await: their entry does not linger
/// until the sweep.
pub struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    pub fn new(correlator: &'a Correlator, id: u64) -> Self {
        Self {
            correlator,
            id,
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.expire(self.id);
        }
    }
}
