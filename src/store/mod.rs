//! # store — Persistence
//!
//! The [`Store`] trait is the only thing the orchestrator and the HTTP layer
//! know about persistence.
//!
//! | Backend        | When                                                  |
//! |----------------|-------------------------------------------------------|
//! | [`MemoryStore`] | default, tests, `DATABASE_URL` unset                 |
//! | `PgStore`      | `--features postgres` and `DATABASE_URL` set          |
//!
//! ## Contract
//! - [`Store::commit_cycle`] runs the weekly gate and the insert as one
//!   atomic step, together with the cooldown changes, trades and activity of
//!   that cycle. On refusal nothing is written.
//! - Locked snapshots are immutable: updates are refused, data unchanged.
//! - At most one active sold-position record per ticker; a new sale updates
//!   the active record in place.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::engine::{CooldownChanges, PolicyRefusal, WeekCalendar};
use crate::models::{
    ActivityLogEntry, NewActivity, NewSnapshot, PortfolioSnapshot, SnapshotUpdate, SoldPosition,
    TradeRecord,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    /// Expected refusal from the portfolio ledger rules.
    #[error(transparent)]
    Refused(#[from] PolicyRefusal),

    #[error("Snapshot {0} not found")]
    NotFound(i64),

    /// The data layer caught something that must never happen.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

// ─── Cycle Commit ─────────────────────────────────────────────────────────────

/// Everything one rotation cycle writes.
#[derive(Debug, Clone)]
pub struct CycleCommit {
    pub snapshot:  NewSnapshot,
    pub cooldowns: CooldownChanges,
    pub trades:    Vec<TradeRecord>,
    pub activity:  Vec<NewActivity>,
}

// ─── Store Trait ──────────────────────────────────────────────────────────────

#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs and `/health`.
    fn backend(&self) -> &'static str;

    // ── Snapshots ────────────────────────────────────────────────────────────

    /// Most recent snapshot by timestamp, locked or not.
    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, StoreError>;

    async fn snapshot(&self, id: i64) -> Result<Option<PortfolioSnapshot>, StoreError>;

    /// Newest snapshot stamped strictly before `at`.
    async fn snapshot_before(&self, at: DateTime<Utc>) -> Result<Option<PortfolioSnapshot>, StoreError>;

    /// Newest first.
    async fn snapshot_history(&self, limit: usize) -> Result<Vec<PortfolioSnapshot>, StoreError>;

    /// The snapshot stored in the calendar week containing `at`, if any.
    async fn snapshot_in_week(
        &self,
        calendar: &WeekCalendar,
        at:       DateTime<Utc>,
    ) -> Result<Option<PortfolioSnapshot>, StoreError>;

    /// Gate + insert + ledger writes, all or nothing. The snapshot is stored
    /// open.
    async fn commit_cycle(
        &self,
        commit:   CycleCommit,
        calendar: &WeekCalendar,
        now:      DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, StoreError>;

    /// Insert a backdated snapshot. Always stored locked.
    async fn import_snapshot(
        &self,
        snapshot: NewSnapshot,
        calendar: &WeekCalendar,
        now:      DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, StoreError>;

    /// Refused with [`PolicyRefusal::SnapshotLocked`] on a locked snapshot.
    async fn update_snapshot(&self, id: i64, update: &SnapshotUpdate) -> Result<PortfolioSnapshot, StoreError>;

    /// Idempotent.
    async fn lock_snapshot(&self, id: i64) -> Result<PortfolioSnapshot, StoreError>;

    /// Lock every snapshot stamped strictly before `before`. Returns how many
    /// changed state.
    async fn lock_snapshots_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    // ── Sold positions ───────────────────────────────────────────────────────

    async fn sold_positions(&self, active_only: bool) -> Result<Vec<SoldPosition>, StoreError>;

    // ── Activity ─────────────────────────────────────────────────────────────

    async fn append_activity(&self, entry: NewActivity) -> Result<ActivityLogEntry, StoreError>;

    /// Newest first.
    async fn activity_log(&self, limit: usize) -> Result<Vec<ActivityLogEntry>, StoreError>;

    /// Administrative reset. Returns the number of entries removed.
    async fn clear_activity_log(&self) -> Result<u64, StoreError>;

    // ── Trades ───────────────────────────────────────────────────────────────

    /// Newest first, optionally for one ticker.
    async fn trades(&self, limit: usize, ticker: Option<&str>) -> Result<Vec<TradeRecord>, StoreError>;

    // ── Settings ─────────────────────────────────────────────────────────────

    async fn settings(&self) -> Result<BTreeMap<String, String>, StoreError>;

    /// Upsert. Values are assumed already validated.
    async fn put_settings(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError>;
}
