//! # models::cooldown
//!
//! [`SoldPosition`] — one row per sale made by the rotation engine.
//!
//! A ticker moves through `held → sold → cooling down → eligible`. The row is
//! the "sold / cooling down" half of that lifecycle; it is closed
//! (`rebought = true`) once the ticker re-enters the portfolio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Ticker;

// ─── SaleReason ───────────────────────────────────────────────────────────────

/// Why the rotation engine sold a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleReason {
    /// Ranked 1–3: won too hard, take profit and wait for mean reversion.
    #[serde(rename = "top_3")]
    Top3,
    /// Fell out of the top 15 (or out of the ranking entirely).
    DropOut,
}

impl SaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleReason::Top3    => "top_3",
            SaleReason::DropOut => "drop_out",
        }
    }
}

impl std::fmt::Display for SaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SaleReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top_3"    => Ok(SaleReason::Top3),
            "drop_out" => Ok(SaleReason::DropOut),
            other      => Err(format!("unknown sale reason '{other}'")),
        }
    }
}

// ─── SoldPosition ─────────────────────────────────────────────────────────────

/// A sale and the re-entry window it opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoldPosition {
    /// Store-assigned id (0 until persisted).
    pub id:              i64,
    pub ticker:          Ticker,
    pub sold_date:       DateTime<Utc>,
    pub sold_reason:     SaleReason,
    /// Rank at the moment of sale. `None` when the ticker had dropped out of
    /// the ranking entirely.
    pub sold_rank:       Option<u32>,
    pub can_rebuy_after: DateTime<Utc>,
    pub rebought:        bool,
    pub rebought_date:   Option<DateTime<Utc>>,
}

impl SoldPosition {
    /// Active = still governs re-entry for its ticker.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.rebought
    }

    /// Days until the window closes, rounded up: a window closing in a few
    /// hours still reports 1. Never negative.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        const DAY_SECS: i64 = 86_400;
        let secs = (self.can_rebuy_after - now).num_seconds();
        if secs <= 0 {
            0
        } else {
            (secs + DAY_SECS - 1) / DAY_SECS
        }
    }
}
