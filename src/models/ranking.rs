//! # models::ranking
//!
//! Price observations coming in from the price feed and the ranked view the
//! Ranker produces from them.
//!
//! `RankedTicker` lives for exactly one cycle. It is never written to the
//! store; the orchestrator only keeps the last ranking in memory so the
//! dashboard can show it.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{Ticker, Zone};

// ─── PricePoint ───────────────────────────────────────────────────────────────

/// One daily close for a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date:  NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }

    /// NaN, infinities and non-positive closes are feed garbage.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

/// Daily closes per ticker. Points are not assumed to be sorted.
pub type PriceHistory = HashMap<Ticker, Vec<PricePoint>>;

/// Latest valid close per ticker, used for valuation and simulated fills.
pub fn latest_prices(history: &PriceHistory) -> HashMap<Ticker, f64> {
    history
        .iter()
        .filter_map(|(ticker, points)| {
            points
                .iter()
                .filter(|p| p.is_valid())
                .max_by_key(|p| p.date)
                .map(|p| (ticker.clone(), p.close))
        })
        .collect()
}

// ─── RankedTicker ─────────────────────────────────────────────────────────────

/// A ticker with its trailing momentum and its position in this cycle's order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTicker {
    pub ticker:       Ticker,
    /// `(end − start) / start × 100` over the lookback window.
    pub momentum_pct: f64,
    /// 1 = strongest momentum.
    pub rank:         u32,
}

impl RankedTicker {
    /// Zone this rank falls into, `None` below the buffer.
    pub fn zone(&self) -> Option<Zone> {
        Zone::for_rank(self.rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[test]
    fn latest_price_ignores_invalid_points() {
        let mut history = PriceHistory::new();
        history.insert(
            "MU".into(),
            vec![
                PricePoint::new(d(3), 101.0),
                PricePoint::new(d(7), f64::NAN),
                PricePoint::new(d(5), 104.5),
            ],
        );
        history.insert("XEL".into(), vec![PricePoint::new(d(3), 0.0)]);

        let prices = latest_prices(&history);
        assert_eq!(prices.get("MU"), Some(&104.5));
        assert!(!prices.contains_key("XEL"));
    }
}
