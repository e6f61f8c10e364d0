//! # models::portfolio
//!
//! Holdings, weekly snapshots and the simulated trade tickets that move money
//! between them.
//!
//! ## Ownership
//! `Holding` values are owned by exactly one [`PortfolioSnapshot`]. A rotation
//! never edits a holding in place: a sold ticker simply does not appear in the
//! next snapshot, a bought one appears with fresh entry data.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{RankedTicker, Ticker};
use crate::policy::{BUFFER_RANKS, CORE_RANKS, TAKE_PROFIT_MAX_RANK};

// ─── Zone ─────────────────────────────────────────────────────────────────────

/// Rank bands of the top-15 basket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// Ranks 1–3. Holding here forces a take-profit sale.
    TakeProfit,
    /// Ranks 4–13. The buy / hold band.
    Core,
    /// Ranks 14–15. Held passively, outside slot accounting.
    Buffer,
}

impl Zone {
    pub fn for_rank(rank: u32) -> Option<Zone> {
        match rank {
            1..=TAKE_PROFIT_MAX_RANK           => Some(Zone::TakeProfit),
            r if CORE_RANKS.contains(&r)       => Some(Zone::Core),
            r if BUFFER_RANKS.contains(&r)     => Some(Zone::Buffer),
            _ => None,
        }
    }
}

// ─── Holding ──────────────────────────────────────────────────────────────────

/// An open (simulated) position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker:            Ticker,
    pub rank_at_entry:     u32,
    pub entry_price:       f64,
    pub shares:            f64,
    /// Dollars committed at entry (`shares × entry_price`).
    pub capital_allocated: f64,
    pub entry_date:        DateTime<Utc>,
    /// Rank in the ranking that produced the owning snapshot.
    #[serde(default)]
    pub current_rank:      Option<u32>,
    #[serde(default)]
    pub zone:              Option<Zone>,
    /// Market price at the owning snapshot's last valuation. `None` when the
    /// feed had no price and the holding was carried at cost.
    #[serde(default)]
    pub mark:              Option<PriceMark>,
}

/// A holding marked to market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceMark {
    pub price:           f64,
    /// Trailing one-week price change, when the feed covered the week.
    pub week_change_pct: Option<f64>,
}

// ─── ZoneBasket ───────────────────────────────────────────────────────────────

/// The ranked top-15 as it looked when a snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneBasket {
    pub take_profit: Vec<Ticker>,
    pub core:        Vec<Ticker>,
    pub buffer:      Vec<Ticker>,
}

impl ZoneBasket {
    /// Partition a ranking (any length) into the three bands.
    pub fn from_ranking(ranked: &[RankedTicker]) -> Self {
        let mut basket = ZoneBasket::default();
        for entry in ranked {
            match entry.zone() {
                Some(Zone::TakeProfit) => basket.take_profit.push(entry.ticker.clone()),
                Some(Zone::Core)       => basket.core.push(entry.ticker.clone()),
                Some(Zone::Buffer)     => basket.buffer.push(entry.ticker.clone()),
                None => {}
            }
        }
        basket
    }
}

// ─── PortfolioSnapshot ────────────────────────────────────────────────────────

/// A persisted week of the portfolio.
///
/// `locked = false` → the current week, may be annotated or revalued.
/// `locked = true`  → history; every mutation is refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub id:          i64,
    pub timestamp:   DateTime<Utc>,
    pub holdings:    Vec<Holding>,
    pub basket:      ZoneBasket,
    /// Uninvested cash left after this cycle's simulated trades.
    pub cash:        f64,
    pub total_value: f64,
    pub locked:      bool,
    pub notes:       Option<String>,
}

impl PortfolioSnapshot {
    pub fn tickers(&self) -> Vec<Ticker> {
        self.holdings.iter().map(|h| h.ticker.clone()).collect()
    }

    pub fn holding(&self, ticker: &str) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.ticker == ticker)
    }

    pub fn holdings_in(&self, zone: Zone) -> impl Iterator<Item = &Holding> {
        self.holdings.iter().filter(move |h| h.zone == Some(zone))
    }

    /// Change log against the previous snapshot: bought, sold, and holdings
    /// that changed zone.
    pub fn diff(&self, previous: Option<&PortfolioSnapshot>) -> SnapshotDiff {
        let new_zones: BTreeMap<&str, Option<Zone>> =
            self.holdings.iter().map(|h| (h.ticker.as_str(), h.zone)).collect();

        let Some(previous) = previous else {
            return SnapshotDiff {
                added:   new_zones.keys().map(|t| t.to_string()).collect(),
                removed: Vec::new(),
                moved:   Vec::new(),
            };
        };

        let old_zones: BTreeMap<&str, Option<Zone>> =
            previous.holdings.iter().map(|h| (h.ticker.as_str(), h.zone)).collect();

        let added = new_zones
            .keys()
            .filter(|t| !old_zones.contains_key(*t))
            .map(|t| t.to_string())
            .collect();
        let removed = old_zones
            .keys()
            .filter(|t| !new_zones.contains_key(*t))
            .map(|t| t.to_string())
            .collect();
        let moved = new_zones
            .iter()
            .filter_map(|(ticker, to)| {
                let from = old_zones.get(ticker)?;
                (from != to).then(|| ZoneMove {
                    ticker: ticker.to_string(),
                    from:   *from,
                    to:     *to,
                })
            })
            .collect();

        SnapshotDiff { added, removed, moved }
    }
}

/// Result of [`PortfolioSnapshot::diff`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub added:   Vec<Ticker>,
    pub removed: Vec<Ticker>,
    pub moved:   Vec<ZoneMove>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneMove {
    pub ticker: Ticker,
    pub from:   Option<Zone>,
    pub to:     Option<Zone>,
}

/// A snapshot about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub timestamp:   DateTime<Utc>,
    pub holdings:    Vec<Holding>,
    #[serde(default)]
    pub basket:      ZoneBasket,
    #[serde(default)]
    pub cash:        f64,
    pub total_value: f64,
    #[serde(default)]
    pub notes:       Option<String>,
}

impl NewSnapshot {
    pub fn into_snapshot(self, id: i64, locked: bool) -> PortfolioSnapshot {
        PortfolioSnapshot {
            id,
            timestamp:   self.timestamp,
            holdings:    self.holdings,
            basket:      self.basket,
            cash:        self.cash,
            total_value: self.total_value,
            locked,
            notes:       self.notes,
        }
    }
}

/// Fields that may change on an open snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotUpdate {
    pub notes:       Option<String>,
    pub total_value: Option<f64>,
    /// Fresh marks; every holding is re-marked, absent tickers lose theirs.
    pub marks:       Option<HashMap<Ticker, PriceMark>>,
}

impl SnapshotUpdate {
    pub fn apply_to(&self, snapshot: &mut PortfolioSnapshot) {
        if let Some(notes) = &self.notes {
            snapshot.notes = Some(notes.clone());
        }
        if let Some(value) = self.total_value {
            snapshot.total_value = value;
        }
        if let Some(marks) = &self.marks {
            for holding in &mut snapshot.holdings {
                holding.mark = marks.get(&holding.ticker).copied();
            }
        }
    }
}

// ─── TradeRecord ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    #[cfg(feature = "postgres")]
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy  => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

/// Simulated order ticket. Book-keeping only, always considered filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id:                Uuid,
    pub timestamp:         DateTime<Utc>,
    pub ticker:            Ticker,
    pub action:            TradeAction,
    pub rank:              Option<u32>,
    pub price:             f64,
    pub shares:            f64,
    pub capital_allocated: f64,
    /// `price × shares` for buys, proceeds for sells.
    pub total_cost:        f64,
    /// Cash on hand right after this ticket.
    pub cash_remaining:    f64,
    pub note:              Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(ticker: &str, zone: Zone) -> Holding {
        Holding {
            ticker:            ticker.into(),
            rank_at_entry:     5,
            entry_price:       10.0,
            shares:            10.0,
            capital_allocated: 100.0,
            entry_date:        Utc::now(),
            current_rank:      None,
            zone:              Some(zone),
            mark:              None,
        }
    }

    fn snapshot(holdings: Vec<Holding>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            id: 1,
            timestamp: Utc::now(),
            holdings,
            basket: ZoneBasket::default(),
            cash: 0.0,
            total_value: 0.0,
            locked: false,
            notes: None,
        }
    }

    #[test]
    fn zone_bands() {
        assert_eq!(Zone::for_rank(1), Some(Zone::TakeProfit));
        assert_eq!(Zone::for_rank(3), Some(Zone::TakeProfit));
        assert_eq!(Zone::for_rank(4), Some(Zone::Core));
        assert_eq!(Zone::for_rank(13), Some(Zone::Core));
        assert_eq!(Zone::for_rank(14), Some(Zone::Buffer));
        assert_eq!(Zone::for_rank(15), Some(Zone::Buffer));
        assert_eq!(Zone::for_rank(16), None);
        assert_eq!(Zone::for_rank(0), None);
    }

    #[test]
    fn diff_reports_added_removed_and_moved() {
        let old = snapshot(vec![holding("MU", Zone::Core), holding("CAT", Zone::Core)]);
        let new = snapshot(vec![holding("MU", Zone::Buffer), holding("NEE", Zone::Core)]);

        let diff = new.diff(Some(&old));
        assert_eq!(diff.added, vec!["NEE".to_string()]);
        assert_eq!(diff.removed, vec!["CAT".to_string()]);
        assert_eq!(diff.moved.len(), 1);
        assert_eq!(diff.moved[0].ticker, "MU");
        assert_eq!(diff.moved[0].from, Some(Zone::Core));
        assert_eq!(diff.moved[0].to, Some(Zone::Buffer));
    }

    #[test]
    fn diff_without_previous_adds_everything() {
        let new = snapshot(vec![holding("MU", Zone::Core)]);
        let diff = new.diff(None);
        assert_eq!(diff.added, vec!["MU".to_string()]);
        assert!(diff.removed.is_empty());
    }
}
