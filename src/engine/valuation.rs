//! # engine::valuation
//!
//! Dollar value of a holding set, equal-weight slot sizing, the cash effect
//! of simulated fills, and performance against the starting capital.
//!
//! A holding with no usable price is carried at its `capital_allocated`
//! rather than at zero, so a feed hiccup never shows up as a crash in
//! portfolio value.

use std::collections::HashMap;

use serde::Serialize;

use chrono::NaiveDate;

use crate::engine::ranker;
use crate::models::{latest_prices, Holding, PortfolioSnapshot, PriceHistory, PriceMark, Ticker, Zone};

/// Window of the per-holding "this week" change.
pub const PERFORMANCE_WINDOW_DAYS: i64 = 7;

/// Usable price for `ticker`: finite and strictly positive.
pub fn price_of(prices: &HashMap<Ticker, f64>, ticker: &str) -> Option<f64> {
    prices
        .get(ticker)
        .copied()
        .filter(|p| p.is_finite() && *p > 0.0)
}

/// `shares × price`, falling back to `capital_allocated`.
pub fn holding_value(holding: &Holding, prices: &HashMap<Ticker, f64>) -> f64 {
    match price_of(prices, &holding.ticker) {
        Some(price) => holding.shares * price,
        None => holding.capital_allocated,
    }
}

/// Σ [`holding_value`] over every holding, buffer included.
pub fn value(holdings: &[Holding], prices: &HashMap<Ticker, f64>) -> f64 {
    holdings.iter().map(|h| holding_value(h, prices)).sum()
}

/// Equal-weight capital for the next buy.
///
/// `total_capital / target_size`, but never more than an even share of the
/// cash still on hand across the buys that remain.
pub fn slot_capital(total_capital: f64, target_size: usize, cash: f64, remaining_buys: usize) -> f64 {
    if target_size == 0 || remaining_buys == 0 || cash <= 0.0 {
        return 0.0;
    }
    let equal_weight = total_capital / target_size as f64;
    let affordable   = cash / remaining_buys as f64;
    equal_weight.min(affordable).max(0.0)
}

/// Fractional shares bought with `capital` at `price`.
pub fn shares_for(capital: f64, price: f64) -> Option<f64> {
    (price.is_finite() && price > 0.0 && capital > 0.0).then(|| capital / price)
}

/// What a simulated sale of `holding` realises: `(fill price, proceeds)`.
/// Without a price the position is closed at its entry cost.
pub fn sale_proceeds(holding: &Holding, prices: &HashMap<Ticker, f64>) -> (f64, f64) {
    match price_of(prices, &holding.ticker) {
        Some(price) => (price, holding.shares * price),
        None => (holding.entry_price, holding.capital_allocated),
    }
}

/// Latest price and one-week change per ticker the feed served.
pub fn price_marks(history: &PriceHistory, as_of: NaiveDate) -> HashMap<Ticker, PriceMark> {
    latest_prices(history)
        .into_iter()
        .map(|(ticker, price)| {
            let week_change_pct = history
                .get(&ticker)
                .and_then(|points| ranker::momentum(points, as_of, PERFORMANCE_WINDOW_DAYS));
            (ticker, PriceMark { price, week_change_pct })
        })
        .collect()
}

// ─── Summary ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationSummary {
    pub holdings_value:  f64,
    pub cash:            f64,
    pub total_value:     f64,
    pub cost_basis:      f64,
    pub unrealized_pnl:  f64,
    pub unrealized_pct:  f64,
    /// Holdings valued at a live price.
    pub priced:          usize,
    /// Holdings carried at cost for lack of a price.
    pub at_cost:         usize,
}

pub fn summarize(holdings: &[Holding], cash: f64, prices: &HashMap<Ticker, f64>) -> ValuationSummary {
    let holdings_value = value(holdings, prices);
    let cost_basis: f64 = holdings.iter().map(|h| h.capital_allocated).sum();
    let priced = holdings
        .iter()
        .filter(|h| price_of(prices, &h.ticker).is_some())
        .count();

    let unrealized_pnl = holdings_value - cost_basis;
    let unrealized_pct = if cost_basis > 0.0 { unrealized_pnl / cost_basis * 100.0 } else { 0.0 };

    ValuationSummary {
        holdings_value,
        cash,
        total_value: cash + holdings_value,
        cost_basis,
        unrealized_pnl,
        unrealized_pct,
        priced,
        at_cost: holdings.len() - priced,
    }
}

impl ValuationSummary {
    /// Figures as recorded at the snapshot's last valuation, no fresh prices.
    pub fn recorded(snapshot: &PortfolioSnapshot) -> Self {
        let cost_basis: f64 = snapshot.holdings.iter().map(|h| h.capital_allocated).sum();
        let holdings_value  = snapshot.total_value - snapshot.cash;
        let unrealized_pnl  = holdings_value - cost_basis;
        let priced          = snapshot.holdings.iter().filter(|h| h.mark.is_some()).count();

        Self {
            holdings_value,
            cash:           snapshot.cash,
            total_value:    snapshot.total_value,
            cost_basis,
            unrealized_pnl,
            unrealized_pct: if cost_basis > 0.0 { unrealized_pnl / cost_basis * 100.0 } else { 0.0 },
            priced,
            at_cost:        snapshot.holdings.len() - priced,
        }
    }
}

// ─── Performance ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingPerformance {
    pub ticker:          Ticker,
    pub zone:            Option<Zone>,
    pub entry_price:     f64,
    pub price:           Option<f64>,
    pub value:           f64,
    /// Price change since entry.
    pub change_pct:      Option<f64>,
    pub week_change_pct: Option<f64>,
}

/// The portfolio measured against the capital it started with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioPerformance {
    pub initial_value:      f64,
    pub total_value:        f64,
    pub gain:               f64,
    pub return_pct:         f64,
    /// Mean one-week change over the holdings that have one.
    pub weekly_performance: Option<f64>,
    pub holdings:           Vec<HoldingPerformance>,
}

/// Performance of `snapshot` as of its last valuation.
pub fn performance(snapshot: &PortfolioSnapshot, initial_value: f64) -> PortfolioPerformance {
    let holdings: Vec<HoldingPerformance> = snapshot
        .holdings
        .iter()
        .map(|h| {
            let price = h.mark.map(|m| m.price);
            HoldingPerformance {
                ticker:          h.ticker.clone(),
                zone:            h.zone,
                entry_price:     h.entry_price,
                price,
                value:           price.map_or(h.capital_allocated, |p| h.shares * p),
                change_pct:      price
                    .filter(|_| h.entry_price > 0.0)
                    .map(|p| (p - h.entry_price) / h.entry_price * 100.0),
                week_change_pct: h.mark.and_then(|m| m.week_change_pct),
            }
        })
        .collect();

    let weekly: Vec<f64> = holdings.iter().filter_map(|h| h.week_change_pct).collect();
    let weekly_performance = (!weekly.is_empty()).then(|| weekly.iter().sum::<f64>() / weekly.len() as f64);

    let gain = snapshot.total_value - initial_value;
    PortfolioPerformance {
        initial_value,
        total_value: snapshot.total_value,
        gain,
        return_pct: if initial_value > 0.0 { gain / initial_value * 100.0 } else { 0.0 },
        weekly_performance,
        holdings,
    }
}
