//! Weekly usage aggregate with Sunday-midnight rollover.

use crate::store::{read_json, write_json, KeyValueStore, StoreKeys};
use crate::Result;
use chrono::{DateTime, Datelike, Local, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Counters read (and reset) from one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsSnapshot {
    pub clicks: u64,
    pub blocked_commands: u64,
}

impl StatsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.clicks == 0 && self.blocked_commands == 0
    }

    pub fn add(&mut self, other: StatsSnapshot) {
        self.clicks = self.clicks.saturating_add(other.clicks);
        self.blocked_commands = self.blocked_commands.saturating_add(other.blocked_commands);
    }
}

/// Persisted totals for one week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyStats {
    /// Epoch milliseconds of the week's first instant (Sunday 00:00 local).
    pub week_start: i64,
    pub clicks: u64,
    pub blocked_commands: u64,
}

impl WeeklyStats {
    pub fn empty(week_start: i64) -> Self {
        Self {
            week_start,
            clicks: 0,
            blocked_commands: 0,
        }
    }

    pub fn week_start_local(&self) -> Option<DateTime<Local>> {
        Local.timestamp_millis_opt(self.week_start).single()
    }
}

/// Start of the week containing `now`, in epoch milliseconds.
pub fn week_start_for(now: DateTime<Local>) -> i64 {
    let days_back = now.weekday().num_days_from_sunday() as i64;
    let sunday = now.date_naive() - chrono::Duration::days(days_back);
    let midnight = sunday.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&midnight))
        .timestamp_millis()
}

/// Reads and updates the weekly aggregate in the shared store.
#[derive(Clone)]
pub struct WeeklyLedger {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
}

impl WeeklyLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StoreKeys) -> Self {
        Self { store, keys }
    }

    /// Current week's totals, rolling over first if `now` is in a later week.
    ///
    /// On rollover the finished week is kept under the last-week key until
    /// [`take_last_week`](Self::take_last_week) consumes it.
    pub fn load(&self, now: DateTime<Local>) -> Result<WeeklyStats> {
        let this_week = week_start_for(now);
        let stored: Option<WeeklyStats> = read_json(self.store.as_ref(), &self.keys.weekly_stats)?;

        match stored {
            Some(stats) if stats.week_start >= this_week => Ok(stats),
            Some(finished) => {
                info!(
                    "Weekly stats rollover: {} clicks, {} blocked last week",
                    finished.clicks, finished.blocked_commands
                );
                write_json(self.store.as_ref(), &self.keys.last_week_stats, &finished)?;
                let fresh = WeeklyStats::empty(this_week);
                write_json(self.store.as_ref(), &self.keys.weekly_stats, &fresh)?;
                Ok(fresh)
            }
            None => {
                let fresh = WeeklyStats::empty(this_week);
                write_json(self.store.as_ref(), &self.keys.weekly_stats, &fresh)?;
                Ok(fresh)
            }
        }
    }

    /// Add a snapshot to the current week.
    pub fn record(&self, snapshot: StatsSnapshot, now: DateTime<Local>) -> Result<WeeklyStats> {
        let mut stats = self.load(now)?;
        if snapshot.is_empty() {
            return Ok(stats);
        }
        stats.clicks = stats.clicks.saturating_add(snapshot.clicks);
        stats.blocked_commands = stats.blocked_commands.saturating_add(snapshot.blocked_commands);
        write_json(self.store.as_ref(), &self.keys.weekly_stats, &stats)?;
        Ok(stats)
    }

    /// Return the finished week's totals, once.
    pub fn take_last_week(&self) -> Result<Option<WeeklyStats>> {
        let last: Option<WeeklyStats> = read_json(self.store.as_ref(), &self.keys.last_week_stats)?;
        if last.is_some() {
            self.store.remove(&self.keys.last_week_stats)?;
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdeKind;
    use crate::store::MemoryStore;
    use chrono::Weekday;

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, 0, 0).earliest().unwrap()
    }

    fn snapshot(clicks: u64, blocked_commands: u64) -> StatsSnapshot {
        StatsSnapshot {
            clicks,
            blocked_commands,
        }
    }

    fn ledger() -> WeeklyLedger {
        WeeklyLedger::new(
            Arc::new(MemoryStore::new()),
            StoreKeys::for_ide(IdeKind::Cursor),
        )
    }

    #[test]
    fn test_week_start_is_sunday_midnight() {
        // 2024-06-12 is a Wednesday.
        let start = week_start_for(local(2024, 6, 12, 15));
        let start = Local.timestamp_millis_opt(start).single().unwrap();
        assert_eq!(start.weekday(), Weekday::Sun);
        assert_eq!(start.date_naive().to_string(), "2024-06-09");
        assert_eq!(start.time(), NaiveTime::MIN);

        // Sunday itself maps to its own midnight.
        assert_eq!(
            week_start_for(local(2024, 6, 9, 23)),
            week_start_for(local(2024, 6, 15, 1))
        );
    }

    #[test]
    fn test_record_accumulates_within_week() {
        let ledger = ledger();
        let now = local(2024, 6, 12, 10);
        ledger.record(snapshot(3, 1), now).unwrap();
        let stats = ledger.record(snapshot(2, 0), now).unwrap();
        assert_eq!(stats.clicks, 5);
        assert_eq!(stats.blocked_commands, 1);
        assert!(ledger.take_last_week().unwrap().is_none());
    }

    #[test]
    fn test_rollover_happens_exactly_once() {
        let ledger = ledger();
        ledger
            .record(snapshot(7, 2), local(2024, 6, 15, 22))
            .unwrap();

        // Next Sunday: rollover.
        let first = ledger.load(local(2024, 6, 16, 9)).unwrap();
        assert_eq!(first.clicks, 0);
        // Same week again: no second rollover.
        let again = ledger
            .record(snapshot(1, 0), local(2024, 6, 17, 9))
            .unwrap();
        assert_eq!(again.clicks, 1);

        let last = ledger.take_last_week().unwrap().unwrap();
        assert_eq!(last.clicks, 7);
        assert_eq!(last.blocked_commands, 2);
        assert!(ledger.take_last_week().unwrap().is_none());
    }

    #[test]
    fn test_snapshot_add() {
        let mut total = StatsSnapshot::default();
        assert!(total.is_empty());
        total.add(snapshot(1, 2));
        total.add(snapshot(3, 0));
        assert_eq!(total, snapshot(4, 2));
    }

    #[test]
    fn test_snapshot_wire_names() {
        let snap: StatsSnapshot =
            serde_json::from_str(r#"{"clicks": 4, "blockedCommands": 1}"#).unwrap();
        assert_eq!(
            snap,
            StatsSnapshot {
                clicks: 4,
                blocked_commands: 1,
            }
        );
    }
}
