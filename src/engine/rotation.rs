//! # engine::rotation — Rotation Engine
//!
//! Given the current holdings, this week's ranking and the cooldown ledger,
//! decide what to sell, what to buy and what to bench.
//!
//! ## Order of evaluation
//! ```text
//! 1. rank lookup from the ranking
//! 2. Sell A  (take-profit) : held & rank ≤ 3                → SELL top_3
//! 3. Sell B  (drop-out)    : held & (unranked | rank > 15)  → SELL drop_out
//! 4. Buffer                : held & rank 14–15              → bench, not counted
//! 5. slots = target_size − |counted holdings after sells|
//! 6. candidates            : rank 4–13, not held, ledger allows re-entry
//! 7. ascending rank, take `slots`
//! ```
//!
//! [`rotate`] is pure: same inputs, same plan, no ledger writes. Step 8 (record
//! sales, close cooldowns of re-bought tickers) is [`apply`], run once the
//! plan is executed.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::cooldown::CooldownLedger;
use crate::models::{RankedTicker, SaleReason, Ticker, Zone};
use crate::policy::{TAKE_PROFIT_MAX_RANK, UNIVERSE_DEPTH};

// ─── Plan ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SellOrder {
    pub ticker: Ticker,
    pub reason: SaleReason,
    /// `None` when the ticker is missing from the ranking altogether.
    pub rank:   Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyOrder {
    pub ticker:       Ticker,
    pub rank:         u32,
    pub momentum_pct: f64,
    /// The ticker had an active (now expired) cooldown record.
    pub reentry:      bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedCandidate {
    pub ticker:      Ticker,
    pub rank:        u32,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationPlan {
    /// No prior holdings: sell / buffer logic was skipped.
    pub first_cycle:     bool,
    pub to_sell:         Vec<SellOrder>,
    pub to_buy:          Vec<BuyOrder>,
    /// Held tickers ranked 14–15.
    pub to_buffer:       Vec<Ticker>,
    /// Held tickers staying in the core band.
    pub kept:            Vec<Ticker>,
    pub slots_available: usize,
    /// Slots left empty because too few candidates were eligible.
    pub shortfall:       usize,
    /// Core-band candidates the cooldown ledger turned down.
    pub rejected:        Vec<RejectedCandidate>,
}

impl RotationPlan {
    /// Counted holdings once the plan is executed.
    pub fn counted_after(&self) -> usize {
        self.kept.len() + self.to_buy.len()
    }

    pub fn is_noop(&self) -> bool {
        self.to_sell.is_empty() && self.to_buy.is_empty()
    }
}

// ─── Core Evaluation ──────────────────────────────────────────────────────────

pub fn rotate(
    current_holdings: &[Ticker],
    ranked_universe:  &[RankedTicker],
    target_size:      usize,
    ledger:           &CooldownLedger,
    now:              DateTime<Utc>,
) -> RotationPlan {
    // ── 1. Rank lookup ────────────────────────────────────────────────────────
    let ranks: HashMap<&str, u32> = ranked_universe
        .iter()
        .map(|r| (r.ticker.as_str(), r.rank))
        .collect();

    let mut held: Vec<&str> = Vec::with_capacity(current_holdings.len());
    for ticker in current_holdings {
        if !held.contains(&ticker.as_str()) {
            held.push(ticker.as_str());
        }
    }

    let first_cycle = held.is_empty();

    let mut to_sell   = Vec::new();
    let mut to_buffer = Vec::new();
    let mut kept      = Vec::new();

    // ── 2–4. Sell A / Sell B / Buffer ─────────────────────────────────────────
    // One pass, one outcome per ticker → a ticker can never be sold twice.
    for &ticker in &held {
        let rank = ranks.get(ticker).copied();

        match rank {
            Some(r) if r <= TAKE_PROFIT_MAX_RANK => to_sell.push(SellOrder {
                ticker: ticker.to_string(),
                reason: SaleReason::Top3,
                rank,
            }),
            Some(r) if r > UNIVERSE_DEPTH => to_sell.push(SellOrder {
                ticker: ticker.to_string(),
                reason: SaleReason::DropOut,
                rank,
            }),
            None => to_sell.push(SellOrder {
                ticker: ticker.to_string(),
                reason: SaleReason::DropOut,
                rank:   None,
            }),
            Some(r) if Zone::for_rank(r) == Some(Zone::Buffer) => to_buffer.push(ticker.to_string()),
            Some(_) => kept.push(ticker.to_string()),
        }
    }

    // ── 5. Slots ──────────────────────────────────────────────────────────────
    let slots_available = target_size.saturating_sub(kept.len());

    // ── 6. Candidates ─────────────────────────────────────────────────────────
    let held_set: HashSet<&str> = held.iter().copied().collect();

    let mut core: Vec<&RankedTicker> = ranked_universe
        .iter()
        .filter(|r| r.zone() == Some(Zone::Core))
        .filter(|r| !held_set.contains(r.ticker.as_str()))
        .collect();
    core.sort_by_key(|r| r.rank);

    let mut to_buy   = Vec::new();
    let mut rejected = Vec::new();

    // ── 7. Ascending rank, first `slots_available` ───────────────────────────
    for candidate in core {
        let decision = ledger.check_reentry(&candidate.ticker, candidate.rank, now);

        if !decision.allowed {
            debug!(
                ticker = %candidate.ticker,
                rank   = candidate.rank,
                reason = %decision.explanation,
                "⏳ Candidate blocked by cooldown"
            );
            rejected.push(RejectedCandidate {
                ticker:      candidate.ticker.clone(),
                rank:        candidate.rank,
                explanation: decision.explanation,
            });
            continue;
        }

        if to_buy.len() < slots_available {
            to_buy.push(BuyOrder {
                ticker:       candidate.ticker.clone(),
                rank:         candidate.rank,
                momentum_pct: candidate.momentum_pct,
                reentry:      ledger.has_active(&candidate.ticker),
            });
        }
    }

    let shortfall = slots_available - to_buy.len();

    RotationPlan {
        first_cycle,
        to_sell,
        to_buy,
        to_buffer,
        kept,
        slots_available,
        shortfall,
        rejected,
    }
}

/// Write the plan's consequences into the ledger: a record for every sale,
/// a closed cooldown for every re-entry.
pub fn apply(plan: &RotationPlan, ledger: &mut CooldownLedger, now: DateTime<Utc>) {
    for sell in &plan.to_sell {
        ledger.record_sale(&sell.ticker, sell.reason, sell.rank, now);
    }

    for buy in &plan.to_buy {
        if ledger.has_active(&buy.ticker) {
            ledger.mark_rebought(&buy.ticker, now);
        }
    }

    info!(
        sells     = plan.to_sell.len(),
        buys      = plan.to_buy.len(),
        benched   = plan.to_buffer.len(),
        shortfall = plan.shortfall,
        "🔁 Rotation applied to cooldown ledger"
    );
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RotationPolicy;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 7, 19, 0, 0).unwrap()
    }

    fn ledger() -> CooldownLedger {
        CooldownLedger::new(&RotationPolicy::default())
    }

    /// Ranking in the given order, ranks 1..N, decreasing momentum.
    fn ranking(names: &[&str]) -> Vec<RankedTicker> {
        names
            .iter()
            .enumerate()
            .map(|(i, t)| RankedTicker {
                ticker:       t.to_string(),
                momentum_pct: 50.0 - i as f64,
                rank:         i as u32 + 1,
            })
            .collect()
    }

    fn held(names: &[&str]) -> Vec<Ticker> {
        names.iter().map(|t| t.to_string()).collect()
    }

    fn universe(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("U{i:02}")).collect()
    }

    // Scenario A universe: P=1 A=2 Q=3 D=4 E=5 B=6 F..L=7..13 M=14 O=15
    const SCENARIO_A: [&str; 15] = [
        "P", "A", "Q", "D", "E", "B", "F", "G", "H", "I", "J", "K", "L", "M", "O",
    ];

    #[test]
    fn scenario_a_sells_take_profit_and_drop_out() {
        let plan = rotate(&held(&["A", "B", "C"]), &ranking(&SCENARIO_A), 12, &ledger(), now());

        assert_eq!(
            plan.to_sell,
            vec![
                SellOrder { ticker: "A".into(), reason: SaleReason::Top3, rank: Some(2) },
                SellOrder { ticker: "C".into(), reason: SaleReason::DropOut, rank: None },
            ]
        );
        assert_eq!(plan.kept, vec!["B".to_string()]);
        assert_eq!(plan.slots_available, 11);

        let bought: Vec<_> = plan.to_buy.iter().map(|b| b.ticker.as_str()).collect();
        assert_eq!(bought, vec!["D", "E", "F", "G", "H", "I", "J", "K", "L"]);
        assert_eq!(plan.shortfall, 2);
    }

    #[test]
    fn rotate_is_deterministic_and_side_effect_free() {
        let mut l = ledger();
        l.record_sale("F", SaleReason::Top3, Some(1), now() - Duration::days(3));
        let before = l.statuses(now()).len();

        let first  = rotate(&held(&["A", "B", "C"]), &ranking(&SCENARIO_A), 12, &l, now());
        let second = rotate(&held(&["A", "B", "C"]), &ranking(&SCENARIO_A), 12, &l, now());

        assert_eq!(first, second);
        assert_eq!(l.statuses(now()).len(), before);
    }

    #[test]
    fn ticker_qualifying_twice_is_sold_once() {
        let plan = rotate(&held(&["A", "A", "B"]), &ranking(&SCENARIO_A), 12, &ledger(), now());
        let sells: Vec<_> = plan.to_sell.iter().filter(|s| s.ticker == "A").collect();
        assert_eq!(sells.len(), 1);
    }

    #[test]
    fn rank_sixteen_is_a_drop_out() {
        let names = universe(20);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let plan = rotate(&held(&["U16", "U05"]), &ranking(&refs), 12, &ledger(), now());

        assert_eq!(plan.to_sell.len(), 1);
        assert_eq!(plan.to_sell[0].reason, SaleReason::DropOut);
        assert_eq!(plan.to_sell[0].rank, Some(16));
    }

    #[test]
    fn buffer_is_neither_sold_nor_counted() {
        let names = universe(15);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let holdings = held(&["U14", "U15", "U04", "U05"]);

        let plan = rotate(&holdings, &ranking(&refs), 12, &ledger(), now());

        assert_eq!(plan.to_buffer, vec!["U14".to_string(), "U15".to_string()]);
        assert!(plan.to_sell.iter().all(|s| s.ticker != "U14" && s.ticker != "U15"));
        // Only U04/U05 count against the target
        assert_eq!(plan.slots_available, 10);
        assert!(plan.to_buy.iter().all(|b| b.ticker != "U14" && b.ticker != "U15"));
    }

    #[test]
    fn slots_are_conserved() {
        let names = universe(30);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let ranked = ranking(&refs);

        for target in [0usize, 1, 5, 12, 20] {
            for n_held in [0usize, 3, 8, 12, 15] {
                let holdings: Vec<Ticker> = names.iter().skip(2).take(n_held).cloned().collect();
                let plan = rotate(&holdings, &ranked, target, &ledger(), now());
                assert!(
                    plan.counted_after() <= target.max(plan.kept.len()),
                    "target {target} held {n_held}: {plan:?}"
                );
                assert!(plan.to_buy.len() <= plan.slots_available);
            }
        }
    }

    #[test]
    fn full_portfolio_buys_nothing() {
        let names = universe(15);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let core: Vec<Ticker> = names[3..13].to_vec(); // ranks 4..13, 10 names
        let plan = rotate(&core, &ranking(&refs), 10, &ledger(), now());

        assert_eq!(plan.slots_available, 0);
        assert!(plan.to_buy.is_empty());
        assert_eq!(plan.shortfall, 0);
    }

    #[test]
    fn first_cycle_buys_core_band_in_rank_order() {
        let names = universe(20);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let plan = rotate(&[], &ranking(&refs), 12, &ledger(), now());

        assert!(plan.first_cycle);
        assert!(plan.to_sell.is_empty());
        let ranks: Vec<u32> = plan.to_buy.iter().map(|b| b.rank).collect();
        assert_eq!(ranks, (4..=13).collect::<Vec<_>>());
        assert_eq!(plan.shortfall, 2);
    }

    #[test]
    fn small_universe_proceeds() {
        // Scenario D: only 10 tickers ranked
        let names = universe(10);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let plan = rotate(&held(&["U02", "U06"]), &ranking(&refs), 12, &ledger(), now());

        assert_eq!(plan.to_sell.len(), 1);
        assert_eq!(plan.to_sell[0].ticker, "U02");
        let bought: Vec<_> = plan.to_buy.iter().map(|b| b.rank).collect();
        assert_eq!(bought, vec![4, 5, 7, 8, 9, 10]);
        assert_eq!(plan.shortfall, 11 - 6);
    }

    #[test]
    fn cooldown_rejections_leave_portfolio_under_target() {
        let mut l = ledger();
        // D sold at the top a week ago, still cooling
        l.record_sale("D", SaleReason::Top3, Some(1), now() - Duration::days(7));
        // H sold at the top three weeks ago, now rank 9, eligible again
        l.record_sale("H", SaleReason::Top3, Some(2), now() - Duration::days(21));

        let plan = rotate(&held(&["B"]), &ranking(&SCENARIO_A), 12, &l, now());

        assert!(plan.to_buy.iter().all(|b| b.ticker != "D"));
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].ticker, "D");

        let h = plan.to_buy.iter().find(|b| b.ticker == "H").unwrap();
        assert!(h.reentry);
    }

    #[test]
    fn apply_records_sales_and_closes_reentries() {
        let mut l = ledger();
        l.record_sale("H", SaleReason::DropOut, None, now() - Duration::days(7));
        l.take_changes();

        let plan = rotate(&held(&["A", "B", "C"]), &ranking(&SCENARIO_A), 12, &l, now());
        apply(&plan, &mut l, now());

        let a = l.get("A").unwrap();
        assert_eq!(a.sold_reason, SaleReason::Top3);
        assert_eq!(a.can_rebuy_after, now() + Duration::days(14));
        assert_eq!(l.get("C").unwrap().sold_reason, SaleReason::DropOut);
        assert!(!l.has_active("H"));

        let changes = l.take_changes();
        assert_eq!(changes.sales.len(), 2);
        assert_eq!(changes.rebought.len(), 1);
    }
}
