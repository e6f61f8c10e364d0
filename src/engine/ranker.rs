//! # engine::ranker
//!
//! **Ranker**: trailing momentum and a total order over the universe.
//!
//! ```text
//! momentum = (close_at_end − close_at_start) / close_at_start × 100
//! window   = [as_of − lookback_days, as_of]      (calendar days)
//! ```
//!
//! Tickers with fewer than two valid closes inside the window are left out of
//! the result entirely. Callers must read "not ranked" as "drop from the
//! universe", never as "worst rank".

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::models::{PriceHistory, PricePoint, RankedTicker, Ticker};

/// Percentage change between the first and last valid close of the window.
/// `None` when fewer than two valid observations fall inside it.
pub fn momentum(points: &[PricePoint], as_of: NaiveDate, lookback_days: i64) -> Option<f64> {
    let start = as_of - Duration::days(lookback_days);

    let mut window: Vec<&PricePoint> = points
        .iter()
        .filter(|p| p.is_valid() && p.date >= start && p.date <= as_of)
        .collect();

    if window.len() < 2 {
        return None;
    }

    window.sort_by_key(|p| p.date);
    let first = window.first()?.close;
    let last  = window.last()?.close;

    Some((last - first) / first * 100.0)
}

/// Rank `tickers` by momentum, best first.
///
/// Exact ties keep the input order (the sort is stable), so the same inputs
/// always give the same ranks. Duplicate tickers are ranked once, at their
/// first occurrence. An empty result is not an error: it means no ticker had
/// enough data and the cycle should be skipped.
pub fn rank(
    tickers:       &[Ticker],
    history:       &PriceHistory,
    as_of:         NaiveDate,
    lookback_days: i64,
) -> Vec<RankedTicker> {
    let mut seen = HashSet::with_capacity(tickers.len());
    let mut scored: Vec<(Ticker, f64)> = Vec::with_capacity(tickers.len());

    for ticker in tickers {
        if !seen.insert(ticker.as_str()) {
            continue;
        }

        let Some(points) = history.get(ticker) else {
            debug!(ticker = %ticker, "No price history — not ranked");
            continue;
        };

        match momentum(points, as_of, lookback_days) {
            Some(pct) => scored.push((ticker.clone(), pct)),
            None => debug!(ticker = %ticker, "Fewer than 2 valid closes in window — not ranked"),
        }
    }

    // slice::sort_by is stable → ties stay in input order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (ticker, momentum_pct))| RankedTicker {
            ticker,
            momentum_pct,
            rank: i as u32 + 1,
        })
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, n).unwrap()
    }

    fn series(start: f64, end: f64) -> Vec<PricePoint> {
        vec![
            PricePoint::new(day(2), start),
            PricePoint::new(day(10), (start + end) / 2.0),
            PricePoint::new(day(20), end),
        ]
    }

    fn tickers(list: &[&str]) -> Vec<Ticker> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn momentum_uses_first_and_last_close_in_window() {
        let points = series(100.0, 125.0);
        let pct = momentum(&points, day(20), 30).unwrap();
        assert!((pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn momentum_ignores_points_outside_window() {
        let mut points = series(100.0, 110.0);
        // Far before the window, must not become the start price
        points.push(PricePoint::new(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(), 1.0));
        let pct = momentum(&points, day(20), 30).unwrap();
        assert!((pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn momentum_needs_two_valid_points() {
        let points = vec![PricePoint::new(day(2), 100.0), PricePoint::new(day(3), f64::NAN)];
        assert_eq!(momentum(&points, day(20), 30), None);
    }

    #[test]
    fn ranks_descending_and_dense() {
        let mut history = PriceHistory::new();
        history.insert("AAA".into(), series(100.0, 105.0));
        history.insert("BBB".into(), series(100.0, 130.0));
        history.insert("CCC".into(), series(100.0, 90.0));

        let ranked = rank(&tickers(&["AAA", "BBB", "CCC"]), &history, day(20), 30);

        let order: Vec<_> = ranked.iter().map(|r| (r.ticker.as_str(), r.rank)).collect();
        assert_eq!(order, vec![("BBB", 1), ("AAA", 2), ("CCC", 3)]);
    }

    #[test]
    fn ties_keep_input_order() {
        let mut history = PriceHistory::new();
        for t in ["ZZZ", "AAA", "MMM"] {
            history.insert(t.into(), series(50.0, 60.0));
        }

        let ranked = rank(&tickers(&["ZZZ", "AAA", "MMM"]), &history, day(20), 30);
        let order: Vec<_> = ranked.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(order, vec!["ZZZ", "AAA", "MMM"]);
    }

    #[test]
    fn insufficient_data_is_absent_not_last() {
        let mut history = PriceHistory::new();
        history.insert("GOOD".into(), series(10.0, 11.0));
        history.insert("THIN".into(), vec![PricePoint::new(day(20), 10.0)]);

        let ranked = rank(&tickers(&["THIN", "GOOD", "MISSING"]), &history, day(20), 30);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].ticker, "GOOD");
        assert_eq!(ranked[0].rank, 1);
    }

    #[test]
    fn no_data_gives_empty_ranking() {
        let ranked = rank(&tickers(&["A", "B"]), &PriceHistory::new(), day(20), 30);
        assert!(ranked.is_empty());
    }

    #[test]
    fn duplicates_ranked_once() {
        let mut history = PriceHistory::new();
        history.insert("DUP".into(), series(10.0, 12.0));
        let ranked = rank(&tickers(&["DUP", "DUP"]), &history, day(20), 30);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn small_universe_is_ranked_in_full() {
        let mut history = PriceHistory::new();
        let names: Vec<Ticker> = (0..10).map(|i| format!("T{i}")).collect();
        for (i, t) in names.iter().enumerate() {
            history.insert(t.clone(), series(100.0, 100.0 + i as f64));
        }

        let ranked = rank(&names, &history, day(20), 30);
        assert_eq!(ranked.len(), 10);
        assert_eq!(ranked[0].ticker, "T9");
        assert_eq!(ranked[9].rank, 10);
    }
}
