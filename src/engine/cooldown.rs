//! # engine::cooldown — Cooldown Ledger
//!
//! Remembers every sale and decides when a sold ticker may come back.
//!
//! ## Rules
//! 1. **No active record**          → allowed
//! 2. **Window still open**         → denied (`now < can_rebuy_after`)
//! 3. **`top_3`, window closed**    → allowed only at rank ≥ `REENTRY_MIN_RANK`
//! 4. **`drop_out`, window closed** → allowed (window is zero-length)
//!
//! The asymmetry is deliberate: a `top_3` sale expects mean reversion and
//! waits, a `drop_out` may re-qualify the very next week.
//!
//! The ledger is a plain value loaded from the store at the start of a cycle.
//! Changes are buffered in `pending` and handed back to the store with the
//! cycle commit, so a failed cycle never leaves half a ledger behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::models::{SaleReason, SoldPosition, Ticker};
use crate::policy::RotationPolicy;

// ─── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReentryDecision {
    pub allowed:     bool,
    pub explanation: String,
}

impl ReentryDecision {
    fn allow(explanation: impl Into<String>) -> Self {
        Self { allowed: true, explanation: explanation.into() }
    }

    fn deny(explanation: impl Into<String>) -> Self {
        Self { allowed: false, explanation: explanation.into() }
    }
}

// ─── Status (for Dashboard / API) ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CooldownStatus {
    pub ticker:          Ticker,
    pub sold_date:       DateTime<Utc>,
    pub sold_reason:     SaleReason,
    pub sold_rank:       Option<u32>,
    pub can_rebuy_after: DateTime<Utc>,
    pub days_remaining:  i64,
    pub can_rebuy:       bool,
}

// ─── Pending changes ──────────────────────────────────────────────────────────

/// Ledger mutations made during one cycle, committed together with the
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooldownChanges {
    /// New or superseding sale records (one per ticker).
    pub sales:    Vec<SoldPosition>,
    /// Tickers whose active record was closed by a re-buy, with the time.
    pub rebought: Vec<(Ticker, DateTime<Utc>)>,
}

impl CooldownChanges {
    pub fn is_empty(&self) -> bool {
        self.sales.is_empty() && self.rebought.is_empty()
    }
}

// ─── Ledger ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CooldownLedger {
    /// At most one active record per ticker; the map key enforces it.
    active:           BTreeMap<Ticker, SoldPosition>,
    top3_cooldown:    Duration,
    reentry_min_rank: u32,
    pending:          CooldownChanges,
}

impl CooldownLedger {
    pub fn new(policy: &RotationPolicy) -> Self {
        Self {
            active:           BTreeMap::new(),
            top3_cooldown:    policy.top3_cooldown(),
            reentry_min_rank: policy.reentry_min_rank,
            pending:          CooldownChanges::default(),
        }
    }

    /// Build from persisted records. Rebought rows are ignored; if the store
    /// ever hands back two active rows for one ticker the most recent sale
    /// wins and the duplicate is reported.
    pub fn from_records(records: impl IntoIterator<Item = SoldPosition>, policy: &RotationPolicy) -> Self {
        let mut ledger = Self::new(policy);

        for record in records.into_iter().filter(SoldPosition::is_active) {
            match ledger.active.get(&record.ticker) {
                Some(existing) => {
                    let newer = record.sold_date > existing.sold_date;
                    let (kept_id, dropped_id) = if newer { (record.id, existing.id) } else { (existing.id, record.id) };
                    warn!(
                        ticker = %record.ticker,
                        kept_id,
                        dropped_id,
                        "⚠️ Duplicate active cooldown rows — keeping the latest sale"
                    );
                    if newer {
                        ledger.active.insert(record.ticker.clone(), record);
                    }
                }
                None => {
                    ledger.active.insert(record.ticker.clone(), record);
                }
            }
        }

        ledger
    }

    // ─── Mutations ───────────────────────────────────────────────────────────

    /// Record a sale. `top_3` opens a window of `top3_cooldown`, `drop_out` a
    /// zero-length one. An existing active record for the ticker is
    /// superseded in place (same id), never duplicated.
    pub fn record_sale(
        &mut self,
        ticker: &str,
        reason: SaleReason,
        rank:   Option<u32>,
        now:    DateTime<Utc>,
    ) -> &SoldPosition {
        let can_rebuy_after = match reason {
            SaleReason::Top3    => now + self.top3_cooldown,
            SaleReason::DropOut => now,
        };

        let id = self.active.get(ticker).map(|prior| prior.id).unwrap_or(0);
        if id != 0 {
            info!(ticker, "Superseding active cooldown with a new sale");
        }

        let record = SoldPosition {
            id,
            ticker:          ticker.to_string(),
            sold_date:       now,
            sold_reason:     reason,
            sold_rank:       rank,
            can_rebuy_after,
            rebought:        false,
            rebought_date:   None,
        };

        self.pending.sales.retain(|s| s.ticker != ticker);
        self.pending.sales.push(record.clone());

        info!(ticker, reason = %reason, rank = ?rank, until = %can_rebuy_after, "📕 Sale recorded");

        self.active.insert(ticker.to_string(), record);
        &self.active[ticker]
    }

    /// Close the active record of `ticker`. Returns it, or `None` when the
    /// ticker had no active cooldown.
    pub fn mark_rebought(&mut self, ticker: &str, now: DateTime<Utc>) -> Option<SoldPosition> {
        let mut record = self.active.remove(ticker)?;
        record.rebought      = true;
        record.rebought_date = Some(now);

        self.pending.rebought.push((ticker.to_string(), now));
        info!(ticker, "📗 Re-bought — cooldown closed");

        Some(record)
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub fn check_reentry(&self, ticker: &str, current_rank: u32, now: DateTime<Utc>) -> ReentryDecision {
        let Some(record) = self.active.get(ticker) else {
            return ReentryDecision::allow("No active cooldown");
        };

        if now < record.can_rebuy_after {
            let days = record.days_remaining(now);
            let unit = if days == 1 { "day" } else { "days" };
            return ReentryDecision::deny(format!("Cooldown active ({days} {unit} remaining)"));
        }

        if record.sold_reason == SaleReason::Top3 && current_rank < self.reentry_min_rank {
            return ReentryDecision::deny(format!(
                "Rank too high ({current_rank}), must drop to {} or below",
                self.reentry_min_rank
            ));
        }

        ReentryDecision::allow("Cooldown expired, OK to rebuy")
    }

    pub fn get(&self, ticker: &str) -> Option<&SoldPosition> {
        self.active.get(ticker)
    }

    pub fn has_active(&self, ticker: &str) -> bool {
        self.active.contains_key(ticker)
    }

    pub fn active(&self) -> impl Iterator<Item = &SoldPosition> {
        self.active.values()
    }

    /// Every active record, most recent sale first.
    pub fn statuses(&self, now: DateTime<Utc>) -> Vec<CooldownStatus> {
        let mut out: Vec<CooldownStatus> = self
            .active
            .values()
            .map(|r| CooldownStatus {
                ticker:          r.ticker.clone(),
                sold_date:       r.sold_date,
                sold_reason:     r.sold_reason,
                sold_rank:       r.sold_rank,
                can_rebuy_after: r.can_rebuy_after,
                days_remaining:  r.days_remaining(now),
                can_rebuy:       now >= r.can_rebuy_after,
            })
            .collect();
        out.sort_by(|a, b| b.sold_date.cmp(&a.sold_date));
        out
    }

    /// Hand the buffered mutations to the caller (and forget them).
    pub fn take_changes(&mut self) -> CooldownChanges {
        std::mem::take(&mut self.pending)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 18, 0, 0).unwrap()
    }

    fn ledger() -> CooldownLedger {
        CooldownLedger::new(&RotationPolicy::default())
    }

    #[test]
    fn unknown_ticker_is_allowed() {
        let decision = ledger().check_reentry("NVDA", 2, t0());
        assert!(decision.allowed);
    }

    #[test]
    fn top3_denied_inside_window() {
        // Sold at rank 2, ten days later back at rank 5
        let mut l = ledger();
        l.record_sale("NVDA", SaleReason::Top3, Some(2), t0());

        let decision = l.check_reentry("NVDA", 5, t0() + Duration::days(10));
        assert!(!decision.allowed);
        assert!(decision.explanation.contains("4 days remaining"), "{}", decision.explanation);
    }

    #[test]
    fn last_hours_of_window_count_as_a_day() {
        let mut l = ledger();
        l.record_sale("NVDA", SaleReason::Top3, Some(2), t0());

        let decision = l.check_reentry("NVDA", 10, t0() + Duration::days(13) + Duration::hours(20));
        assert!(!decision.allowed);
        assert!(decision.explanation.contains("(1 day remaining)"), "{}", decision.explanation);
        assert_eq!(l.statuses(t0() + Duration::days(13) + Duration::hours(20))[0].days_remaining, 1);
        assert_eq!(l.statuses(t0() + Duration::days(14))[0].days_remaining, 0);
    }

    #[test]
    fn top3_denied_after_window_while_rank_too_high() {
        let mut l = ledger();
        l.record_sale("NVDA", SaleReason::Top3, Some(2), t0());

        let later = t0() + Duration::days(15);
        let decision = l.check_reentry("NVDA", 5, later);
        assert!(!decision.allowed);
        assert!(decision.explanation.contains("Rank too high"));

        assert!(l.check_reentry("NVDA", 9, later).allowed);
        assert!(l.check_reentry("NVDA", 13, later).allowed);
    }

    #[test]
    fn top3_stays_denied_for_any_rank_until_window_elapses() {
        let mut l = ledger();
        l.record_sale("AMD", SaleReason::Top3, Some(1), t0());

        for days in [0, 1, 7, 13] {
            for rank in 1..=15 {
                let at = t0() + Duration::days(days);
                assert!(!l.check_reentry("AMD", rank, at).allowed, "day {days} rank {rank}");
            }
        }
    }

    #[test]
    fn drop_out_allows_immediately_at_any_rank() {
        let mut l = ledger();
        l.record_sale("CAT", SaleReason::DropOut, Some(16), t0());

        assert!(l.check_reentry("CAT", 7, t0() + Duration::days(7)).allowed);
        assert!(l.check_reentry("CAT", 4, t0()).allowed);
    }

    #[test]
    fn new_sale_supersedes_active_record() {
        let mut l = ledger();
        l.record_sale("MU", SaleReason::DropOut, None, t0());
        l.record_sale("MU", SaleReason::Top3, Some(3), t0() + Duration::days(7));

        assert_eq!(l.active().count(), 1);
        let active = l.get("MU").unwrap();
        assert_eq!(active.sold_reason, SaleReason::Top3);
        assert_eq!(active.can_rebuy_after, t0() + Duration::days(21));

        let changes = l.take_changes();
        assert_eq!(changes.sales.len(), 1);
    }

    #[test]
    fn mark_rebought_ends_cooldown() {
        let mut l = ledger();
        l.record_sale("ELAN", SaleReason::Top3, Some(2), t0());
        let closed = l.mark_rebought("ELAN", t0() + Duration::days(20)).unwrap();

        assert!(closed.rebought);
        assert!(l.check_reentry("ELAN", 1, t0() + Duration::days(20)).allowed);
        assert!(l.mark_rebought("ELAN", t0()).is_none());

        let changes = l.take_changes();
        assert_eq!(changes.rebought.len(), 1);
        assert!(l.take_changes().is_empty());
    }

    #[test]
    fn from_records_skips_rebought_and_dedupes() {
        let policy = RotationPolicy::default();
        let mk = |id, days, rebought| SoldPosition {
            id,
            ticker:          "XEL".into(),
            sold_date:       t0() + Duration::days(days),
            sold_reason:     SaleReason::DropOut,
            sold_rank:       None,
            can_rebuy_after: t0() + Duration::days(days),
            rebought,
            rebought_date:   None,
        };

        let l = CooldownLedger::from_records(vec![mk(1, 0, true), mk(2, 3, false), mk(3, 1, false)], &policy);
        assert_eq!(l.active().count(), 1);
        assert_eq!(l.get("XEL").unwrap().id, 2);

        // Latest sale wins whichever order the rows arrive in
        let l = CooldownLedger::from_records(vec![mk(3, 5, false), mk(4, 1, false)], &policy);
        assert_eq!(l.get("XEL").unwrap().id, 3);
    }

    #[test]
    fn statuses_report_days_remaining() {
        let mut l = ledger();
        l.record_sale("SCCO", SaleReason::Top3, Some(1), t0());
        let status = &l.statuses(t0() + Duration::days(4))[0];
        assert_eq!(status.days_remaining, 10);
        assert!(!status.can_rebuy);
    }
}
