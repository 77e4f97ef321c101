//! Usage statistics and payload notifications.

mod collector;
mod weekly;

pub use collector::{
    Alert, CollectionPass, NotificationEnvelope, NotificationKind, StatsCollector,
};
pub use weekly::{week_start_for, StatsSnapshot, WeeklyLedger, WeeklyStats};
