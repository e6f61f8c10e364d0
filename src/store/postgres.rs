//! # store::postgres — PostgreSQL Store
//!
//! `sqlx` over a `PgPool`, runtime-checked queries.
//!
//! ## Setup
//! 1. Create a database
//! 2. Set `DATABASE_URL` in `.env`
//! 3. `cargo run --features postgres` — the embedded migration runs at start-up
//!
//! `commit_cycle` and `import_snapshot` take a transaction-scoped advisory
//! lock before reading the week, so two processes racing for the same week
//! serialise on the database and the loser sees the winner's row.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    Executor, PgConnection, PgPool, Row,
};
use tracing::{info, warn};

use crate::engine::{CooldownChanges, PolicyRefusal, WeekCalendar};
use crate::models::{
    ActivityLogEntry, Holding, NewActivity, NewSnapshot, PortfolioSnapshot, SnapshotUpdate,
    SoldPosition, TradeAction, TradeRecord, ZoneBasket,
};
use crate::store::{CycleCommit, Store, StoreError};

const MIGRATION: &str = include_str!("../../migrations/001_init.sql");

/// Key for `pg_advisory_xact_lock` around snapshot inserts.
const SNAPSHOT_LOCK_KEY: i64 = 0x524F_5441_5445;

const SNAPSHOT_COLUMNS: &str =
    "id, taken_at, holdings, basket, cash, total_value, is_locked, notes";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

// ─── Pool Init ────────────────────────────────────────────────────────────────

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply the embedded migration.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        // Plain &str → simple protocol, so the multi-statement file runs as is
        pool.execute(MIGRATION)
            .await
            .context("Failed to run migration 001_init.sql")?;

        info!("✅ PostgreSQL connected and migrations applied");
        Ok(Self { pool })
    }
}

// ─── Row Mapping ──────────────────────────────────────────────────────────────

fn snapshot_from_row(row: &PgRow) -> Result<PortfolioSnapshot, StoreError> {
    let holdings: Json<Vec<Holding>> = row.try_get("holdings")?;
    let basket: Json<ZoneBasket>     = row.try_get("basket")?;

    Ok(PortfolioSnapshot {
        id:          row.try_get("id")?,
        timestamp:   row.try_get("taken_at")?,
        holdings:    holdings.0,
        basket:      basket.0,
        cash:        row.try_get("cash")?,
        total_value: row.try_get("total_value")?,
        locked:      row.try_get("is_locked")?,
        notes:       row.try_get("notes")?,
    })
}

fn sold_from_row(row: &PgRow) -> Result<SoldPosition, StoreError> {
    let reason: String = row.try_get("sold_reason")?;
    let rank: Option<i32> = row.try_get("sold_rank")?;

    Ok(SoldPosition {
        id:              row.try_get("id")?,
        ticker:          row.try_get("ticker")?,
        sold_date:       row.try_get("sold_date")?,
        sold_reason:     reason.parse().map_err(StoreError::Invariant)?,
        sold_rank:       rank.map(|r| r as u32),
        can_rebuy_after: row.try_get("can_rebuy_after")?,
        rebought:        row.try_get("rebought")?,
        rebought_date:   row.try_get("rebought_date")?,
    })
}

fn activity_from_row(row: &PgRow) -> Result<ActivityLogEntry, StoreError> {
    let action: String = row.try_get("action")?;
    let metadata: Option<Json<serde_json::Value>> = row.try_get("metadata")?;

    Ok(ActivityLogEntry {
        id:          row.try_get("id")?,
        timestamp:   row.try_get("logged_at")?,
        action:      action.parse().map_err(StoreError::Invariant)?,
        ticker:      row.try_get("ticker")?,
        description: row.try_get("description")?,
        metadata:    metadata.map(|m| m.0),
    })
}

fn trade_from_row(row: &PgRow) -> Result<TradeRecord, StoreError> {
    let action: String = row.try_get("action")?;
    let action = match action.as_str() {
        "BUY"  => TradeAction::Buy,
        "SELL" => TradeAction::Sell,
        other  => return Err(StoreError::Invariant(format!("unknown trade action '{other}'"))),
    };
    let rank: Option<i32> = row.try_get("rank")?;

    Ok(TradeRecord {
        id:                row.try_get("id")?,
        timestamp:         row.try_get("executed_at")?,
        ticker:            row.try_get("ticker")?,
        action,
        rank:              rank.map(|r| r as u32),
        price:             row.try_get("price")?,
        shares:            row.try_get("shares")?,
        capital_allocated: row.try_get("capital_allocated")?,
        total_cost:        row.try_get("total_cost")?,
        cash_remaining:    row.try_get("cash_remaining")?,
        note:              row.try_get("note")?,
    })
}

// ─── Statements (connection-scoped, usable inside a transaction) ─────────────

async fn snapshot_in_window(
    conn:  &mut PgConnection,
    start: DateTime<Utc>,
    end:   DateTime<Utc>,
) -> Result<Option<PortfolioSnapshot>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM portfolio_snapshots
         WHERE taken_at >= $1 AND taken_at < $2
         ORDER BY taken_at DESC, id DESC
         LIMIT 1"
    ))
    .bind(start)
    .bind(end)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(snapshot_from_row).transpose()
}

async fn insert_snapshot(
    conn:     &mut PgConnection,
    snapshot: &NewSnapshot,
    locked:   bool,
) -> Result<PortfolioSnapshot, StoreError> {
    let row = sqlx::query(&format!(
        "INSERT INTO portfolio_snapshots (taken_at, holdings, basket, cash, total_value, is_locked, notes)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {SNAPSHOT_COLUMNS}"
    ))
    .bind(snapshot.timestamp)
    .bind(Json(&snapshot.holdings))
    .bind(Json(&snapshot.basket))
    .bind(snapshot.cash)
    .bind(snapshot.total_value)
    .bind(locked)
    .bind(&snapshot.notes)
    .fetch_one(conn)
    .await?;

    snapshot_from_row(&row)
}

async fn apply_cooldowns(conn: &mut PgConnection, changes: &CooldownChanges) -> Result<(), StoreError> {
    for sale in &changes.sales {
        // The partial unique index turns a second active row into an update
        sqlx::query(
            r#"
            INSERT INTO sold_positions (ticker, sold_date, sold_reason, sold_rank, can_rebuy_after)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ticker) WHERE NOT rebought DO UPDATE SET
                sold_date       = EXCLUDED.sold_date,
                sold_reason     = EXCLUDED.sold_reason,
                sold_rank       = EXCLUDED.sold_rank,
                can_rebuy_after = EXCLUDED.can_rebuy_after
            "#,
        )
        .bind(&sale.ticker)
        .bind(sale.sold_date)
        .bind(sale.sold_reason.as_str())
        .bind(sale.sold_rank.map(|r| r as i32))
        .bind(sale.can_rebuy_after)
        .execute(&mut *conn)
        .await?;
    }

    for (ticker, at) in &changes.rebought {
        let result = sqlx::query(
            "UPDATE sold_positions SET rebought = TRUE, rebought_date = $2
             WHERE ticker = $1 AND NOT rebought",
        )
        .bind(ticker)
        .bind(*at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            warn!(ticker = %ticker, "Re-buy without an active cooldown row");
        }
    }

    Ok(())
}

async fn insert_trade(conn: &mut PgConnection, trade: &TradeRecord) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO trades
          (id, executed_at, ticker, action, rank, price, shares,
           capital_allocated, total_cost, cash_remaining, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(trade.id)
    .bind(trade.timestamp)
    .bind(&trade.ticker)
    .bind(trade.action.as_str())
    .bind(trade.rank.map(|r| r as i32))
    .bind(trade.price)
    .bind(trade.shares)
    .bind(trade.capital_allocated)
    .bind(trade.total_cost)
    .bind(trade.cash_remaining)
    .bind(&trade.note)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_activity(conn: &mut PgConnection, entry: NewActivity) -> Result<ActivityLogEntry, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO activity_log (logged_at, action, ticker, description, metadata)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(entry.timestamp)
    .bind(entry.action.as_str())
    .bind(&entry.ticker)
    .bind(&entry.description)
    .bind(entry.metadata.as_ref().map(Json))
    .fetch_one(conn)
    .await?;

    let id: i64 = row.try_get("id")?;
    Ok(entry.into_entry(id))
}

// ─── Store ────────────────────────────────────────────────────────────────────

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM portfolio_snapshots ORDER BY taken_at DESC, id DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn snapshot_before(&self, at: DateTime<Utc>) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM portfolio_snapshots
             WHERE taken_at < $1 ORDER BY taken_at DESC, id DESC LIMIT 1"
        ))
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn snapshot(&self, id: i64) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SNAPSHOT_COLUMNS} FROM portfolio_snapshots WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn snapshot_history(&self, limit: usize) -> Result<Vec<PortfolioSnapshot>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM portfolio_snapshots ORDER BY taken_at DESC, id DESC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn snapshot_in_week(
        &self,
        calendar: &WeekCalendar,
        at:       DateTime<Utc>,
    ) -> Result<Option<PortfolioSnapshot>, StoreError> {
        let (start, end) = calendar.week_window(at);
        let mut conn = self.pool.acquire().await?;
        snapshot_in_window(&mut conn, start, end).await
    }

    async fn commit_cycle(
        &self,
        commit:   CycleCommit,
        calendar: &WeekCalendar,
        now:      DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SNAPSHOT_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let (start, end) = calendar.week_window(now);
        let existing = snapshot_in_window(&mut tx, start, end).await?;
        // Dropping `tx` on refusal rolls everything back
        calendar.admit_cycle(now, existing.as_ref())?;

        let stored = insert_snapshot(&mut tx, &commit.snapshot, false).await?;
        apply_cooldowns(&mut tx, &commit.cooldowns).await?;
        for trade in &commit.trades {
            insert_trade(&mut tx, trade).await?;
        }
        for entry in commit.activity {
            insert_activity(&mut tx, entry).await?;
        }

        tx.commit().await?;

        info!(id = stored.id, holdings = stored.holdings.len(), "💾 Cycle committed");
        Ok(stored)
    }

    async fn import_snapshot(
        &self,
        snapshot: NewSnapshot,
        calendar: &WeekCalendar,
        now:      DateTime<Utc>,
    ) -> Result<PortfolioSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SNAPSHOT_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let (start, end) = calendar.week_window(snapshot.timestamp);
        let existing = snapshot_in_window(&mut tx, start, end).await?;
        calendar.admit_import(snapshot.timestamp, now, existing.as_ref())?;

        let stored = insert_snapshot(&mut tx, &snapshot, true).await?;
        tx.commit().await?;

        info!(id = stored.id, timestamp = %stored.timestamp, "📥 Historical snapshot imported (locked)");
        Ok(stored)
    }

    async fn update_snapshot(&self, id: i64, update: &SnapshotUpdate) -> Result<PortfolioSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM portfolio_snapshots WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let mut snapshot = snapshot_from_row(&row)?;
        if snapshot.locked {
            return Err(PolicyRefusal::SnapshotLocked { id }.into());
        }

        update.apply_to(&mut snapshot);

        sqlx::query("UPDATE portfolio_snapshots SET notes = $2, total_value = $3, holdings = $4 WHERE id = $1")
            .bind(id)
            .bind(&snapshot.notes)
            .bind(snapshot.total_value)
            .bind(Json(&snapshot.holdings))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(snapshot)
    }

    async fn lock_snapshot(&self, id: i64) -> Result<PortfolioSnapshot, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE portfolio_snapshots SET is_locked = TRUE WHERE id = $1 RETURNING {SNAPSHOT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        snapshot_from_row(&row)
    }

    async fn lock_snapshots_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE portfolio_snapshots SET is_locked = TRUE WHERE taken_at < $1 AND NOT is_locked")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn sold_positions(&self, active_only: bool) -> Result<Vec<SoldPosition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, ticker, sold_date, sold_reason, sold_rank, can_rebuy_after, rebought, rebought_date
            FROM sold_positions
            WHERE NOT $1 OR NOT rebought
            ORDER BY sold_date DESC
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sold_from_row).collect()
    }

    async fn append_activity(&self, entry: NewActivity) -> Result<ActivityLogEntry, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_activity(&mut conn, entry).await
    }

    async fn activity_log(&self, limit: usize) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, logged_at, action, ticker, description, metadata
             FROM activity_log ORDER BY logged_at DESC, id DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(activity_from_row).collect()
    }

    async fn clear_activity_log(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM activity_log").execute(&self.pool).await?;
        warn!(removed = result.rows_affected(), "🧹 Activity log reset");
        Ok(result.rows_affected())
    }

    async fn trades(&self, limit: usize, ticker: Option<&str>) -> Result<Vec<TradeRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, executed_at, ticker, action, rank, price, shares,
                   capital_allocated, total_cost, cash_remaining, note
            FROM trades
            WHERE $1::text IS NULL OR ticker = $1
            ORDER BY executed_at DESC
            LIMIT $2
            "#,
        )
        .bind(ticker)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    async fn settings(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(String, String), StoreError> {
                Ok((row.try_get("key")?, row.try_get("value")?))
            })
            .collect()
    }

    async fn put_settings(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in values {
            sqlx::query(
                r#"
                INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, NOW())
                ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
