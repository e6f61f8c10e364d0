//! # store::memory
//!
//! In-process [`Store`]. One `RwLock` over all tables: every write method
//! holds the write guard from check to insert, which is what makes
//! `commit_cycle` atomic here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::engine::{CooldownChanges, PolicyRefusal, WeekCalendar};
use crate::models::{
    ActivityLogEntry, NewActivity, NewSnapshot, PortfolioSnapshot, SnapshotUpdate, SoldPosition,
    TradeRecord,
};
use crate::store::{CycleCommit, Store, StoreError};

#[derive(Debug, Default)]
struct Tables {
    snapshots:        Vec<PortfolioSnapshot>,
    sold:             Vec<SoldPosition>,
    activity:         Vec<ActivityLogEntry>,
    trades:           Vec<TradeRecord>,
    settings:         BTreeMap<String, String>,
    next_snapshot_id: i64,
    next_sold_id:     i64,
    next_activity_id: i64,
}

impl Tables {
    fn in_week(&self, calendar: &WeekCalendar, at: DateTime<Utc>) -> Option<&PortfolioSnapshot> {
        let (start, end) = calendar.week_window(at);
        self.snapshots
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .max_by_key(|s| (s.timestamp, s.id))
    }

    fn insert_snapshot(&mut self, snapshot: NewSnapshot, locked: bool) -> PortfolioSnapshot {
        self.next_snapshot_id += 1;
        let stored = snapshot.into_snapshot(self.next_snapshot_id, locked);
        self.snapshots.push(stored.clone());
        stored
    }

    fn push_activity(&mut self, entry: NewActivity) -> ActivityLogEntry {
        self.next_activity_id += 1;
        let stored = entry.into_entry(self.next_activity_id);
        self.activity.push(stored.clone());
        stored
    }

    /// Sales update the ticker's active row in place, or open a new one.
    fn apply_cooldowns(&mut self, changes: CooldownChanges) -> Result<(), StoreError> {
        for sale in changes.sales {
            let active: Vec<usize> = self
                .sold
                .iter()
                .enumerate()
                .filter(|(_, r)| r.ticker == sale.ticker && !r.rebought)
                .map(|(i, _)| i)
                .collect();

            match active.as_slice() {
                [] => {
                    self.next_sold_id += 1;
                    self.sold.push(SoldPosition { id: self.next_sold_id, ..sale });
                }
                [i] => {
                    let row = &mut self.sold[*i];
                    row.sold_date       = sale.sold_date;
                    row.sold_reason     = sale.sold_reason;
                    row.sold_rank       = sale.sold_rank;
                    row.can_rebuy_after = sale.can_rebuy_after;
                }
                _ => {
                    return Err(StoreError::Invariant(format!(
                        "more than one active cooldown for {}",
                        sale.ticker
                    )));
                }
            }
        }

        for (ticker, at) in changes.rebought {
            match self.sold.iter_mut().find(|r| r.ticker == ticker && !r.rebought) {
                Some(row) => {
                    row.rebought      = true;
                    row.rebought_date = Some(at);
                }
                None => warn!(ticker = %ticker, "Re-buy without an active cooldown row"),
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.snapshots.iter().max_by_key(|s| (s.timestamp, s.id)).cloned())
    }

    async fn snapshot(&self, id: i64) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.snapshots.iter().find(|s| s.id == id).cloned())
    }

    async fn snapshot_before(&self, at: DateTime<Utc>) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .iter()
            .filter(|s| s.timestamp < at)
            .max_by_key(|s| (s.timestamp, s.id))
            .cloned())
    }

    async fn snapshot_history(&self, limit: usize) -> Result<Vec<PortfolioSnapshot>, StoreError> {
        let tables = self.tables.read().await;
        let mut all = tables.snapshots.clone();
        all.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        all.truncate(limit);
        Ok(all)
    }

    async fn snapshot_in_week(
        &self,
        calendar: &WeekCalendar,
        at:       DateTime<Utc>,
    ) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.in_week(calendar, at).cloned())
    }

    async fn commit_cycle(
        &self,
        commit:   CycleCommit,
        calendar: &WeekCalendar,
        now:      DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, StoreError> {
        let mut tables = self.tables.write().await;

        calendar.admit_cycle(now, tables.in_week(calendar, now))?;

        // Validate the ledger writes before touching anything
        let mut staged = Tables {
            sold:         tables.sold.clone(),
            next_sold_id: tables.next_sold_id,
            ..Tables::default()
        };
        staged.apply_cooldowns(commit.cooldowns)?;
        tables.sold         = staged.sold;
        tables.next_sold_id = staged.next_sold_id;

        let stored = tables.insert_snapshot(commit.snapshot, false);
        tables.trades.extend(commit.trades);
        for entry in commit.activity {
            tables.push_activity(entry);
        }

        info!(id = stored.id, holdings = stored.holdings.len(), "💾 Cycle committed");
        Ok(stored)
    }

    async fn import_snapshot(
        &self,
        snapshot: NewSnapshot,
        calendar: &WeekCalendar,
        now:      DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, StoreError> {
        let mut tables = self.tables.write().await;

        calendar.admit_import(snapshot.timestamp, now, tables.in_week(calendar, snapshot.timestamp))?;

        let stored = tables.insert_snapshot(snapshot, true);
        info!(id = stored.id, timestamp = %stored.timestamp, "📥 Historical snapshot imported (locked)");
        Ok(stored)
    }

    async fn update_snapshot(&self, id: i64, update: &SnapshotUpdate) -> Result<PortfolioSnapshot, StoreError> {
        let mut tables = self.tables.write().await;
        let snapshot = tables
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if snapshot.locked {
            return Err(PolicyRefusal::SnapshotLocked { id }.into());
        }

        update.apply_to(snapshot);
        Ok(snapshot.clone())
    }

    async fn lock_snapshot(&self, id: i64) -> Result<PortfolioSnapshot, StoreError> {
        let mut tables = self.tables.write().await;
        let snapshot = tables
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))?;

        snapshot.locked = true;
        Ok(snapshot.clone())
    }

    async fn lock_snapshots_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for snapshot in tables.snapshots.iter_mut().filter(|s| s.timestamp < before && !s.locked) {
            snapshot.locked = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn sold_positions(&self, active_only: bool) -> Result<Vec<SoldPosition>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<SoldPosition> = tables
            .sold
            .iter()
            .filter(|r| !active_only || r.is_active())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.sold_date.cmp(&a.sold_date));
        Ok(rows)
    }

    async fn append_activity(&self, entry: NewActivity) -> Result<ActivityLogEntry, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.push_activity(entry))
    }

    async fn activity_log(&self, limit: usize) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.activity.iter().rev().take(limit).cloned().collect())
    }

    async fn clear_activity_log(&self) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables.activity.len() as u64;
        tables.activity.clear();
        warn!(removed, "🧹 Activity log reset");
        Ok(removed)
    }

    async fn trades(&self, limit: usize, ticker: Option<&str>) -> Result<Vec<TradeRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .trades
            .iter()
            .rev()
            .filter(|t| ticker.map_or(true, |wanted| t.ticker == wanted))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn settings(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.tables.read().await.settings.clone())
    }

    async fn put_settings(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for (key, value) in values {
            tables.settings.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
