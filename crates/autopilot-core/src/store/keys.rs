//! Store key layout.
//!
//! Every key is prefixed with the IDE kind so that supervisors attached to
//! different IDEs never contend for the same lock or share a weekly total.

use crate::config::IdeKind;

/// Fully-qualified store keys for one IDE namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub lock_owner: String,
    pub lock_heartbeat: String,
    pub weekly_stats: String,
    pub last_week_stats: String,
    pub pending_enable: String,
}

impl StoreKeys {
    pub fn for_ide(ide: IdeKind) -> Self {
        let ns = ide.as_str();
        Self {
            lock_owner: format!("{ns}.lock.owner"),
            lock_heartbeat: format!("{ns}.lock.heartbeat"),
            weekly_stats: format!("{ns}.stats.weekly"),
            last_week_stats: format!("{ns}.stats.last_week"),
            pending_enable: format!("{ns}.pending_enable"),
        }
    }
}
