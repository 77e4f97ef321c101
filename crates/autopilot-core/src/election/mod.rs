//! Cross-process leader election.
//!
//! Each open IDE window may run its own supervisor. Only the leader mutates
//! targets; the rest stand by and take over once the leader's heartbeat goes
//! stale or it releases the lock.

mod lock;

pub use lock::{
    generate_instance_id, read_lock, try_acquire_or_renew, InstanceLock, LeaderDecision,
    LockRecord,
};
