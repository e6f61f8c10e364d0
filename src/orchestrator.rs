//! # orchestrator — One Rotation Cycle
//!
//! ```text
//!  lock ─▶ pre-check week ─▶ fetch universe ─▶ fetch prices ─▶ rank
//!                                                              │
//!   commit (gate + snapshot + cooldowns + trades + log) ◀─ simulate ◀─ rotate
//! ```
//!
//! Constructed once at start-up and shared (`Arc`) by the scheduler task and
//! the HTTP handlers. A `Mutex` keyed on "rotation in progress" serialises
//! cycles: a second trigger while one runs is refused at once, it never
//! queues.
//!
//! ## Outcomes
//! | Outcome     | Cause                                         | Writes            |
//! |-------------|-----------------------------------------------|-------------------|
//! | `Completed` | snapshot committed                            | everything, atomic|
//! | `Skipped`   | screener / price failure, nothing rankable    | one `SCAN` entry  |
//! | `Refused`   | weekly gate, cycle already running            | nothing           |
//! | `Failed`    | store error                                   | nothing           |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::{FetchError, PriceFeed, UniverseSource};
use crate::config::{AppConfig, ScheduleSpec};
use crate::engine::{
    self, ranker, valuation, CooldownLedger, CooldownStatus, PolicyRefusal, RotationPlan,
    SnapshotWindow, WeekCalendar,
};
use crate::events::WsEvent;
use crate::models::{
    latest_prices, ActivityAction, Holding, NewActivity, NewSnapshot, PortfolioSnapshot,
    PriceHistory, PriceMark, RankedTicker, SnapshotDiff, SnapshotUpdate, Ticker, TradeAction, TradeRecord, Zone,
    ZoneBasket,
};
use crate::policy::{RotationPolicy, UNIVERSE_DEPTH};
use crate::settings::EffectiveSettings;
use crate::store::{CycleCommit, Store, StoreError};

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Scheduled,
    Manual,
}

impl CycleTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleTrigger::Scheduled => "scheduled",
            CycleTrigger::Manual    => "manual",
        }
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Nothing had enough price data to be ranked.
    #[error("No ticker had enough price data to rank")]
    NothingRanked,

    #[error("No snapshot to work on yet")]
    NoSnapshot,
}

impl From<PolicyRefusal> for CycleError {
    fn from(refusal: PolicyRefusal) -> Self {
        CycleError::Store(StoreError::Refused(refusal))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub trigger:     CycleTrigger,
    pub snapshot:    PortfolioSnapshot,
    pub plan:        RotationPlan,
    pub trades:      Vec<TradeRecord>,
    pub diff:        SnapshotDiff,
    pub valuation:   valuation::ValuationSummary,
    pub performance: valuation::PortfolioPerformance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(Box<CycleReport>),
    Skipped { reason: String },
    Refused(PolicyRefusal),
    Failed { reason: String },
}

/// The ranking of the last cycle that got that far. Memory only.
#[derive(Debug, Clone, Serialize)]
pub struct RankingView {
    pub as_of:         DateTime<Utc>,
    pub universe_size: usize,
    pub ranked:        Vec<RankedTicker>,
    pub basket:        ZoneBasket,
}

/// Dry run: what the next cycle would do with today's data.
#[derive(Debug, Clone, Serialize)]
pub struct RotationPreview {
    pub as_of:   DateTime<Utc>,
    pub ranked:  Vec<RankedTicker>,
    pub basket:  ZoneBasket,
    pub plan:    RotationPlan,
    pub window:  SnapshotWindow,
}

/// Ranked, planned, not yet simulated.
struct Prepared {
    latest:  Option<PortfolioSnapshot>,
    ranked:  Vec<RankedTicker>,
    prices:  HashMap<Ticker, f64>,
    marks:   HashMap<Ticker, PriceMark>,
    ledger:  CooldownLedger,
    plan:    RotationPlan,
    universe_size: usize,
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

pub struct Orchestrator {
    policy:           RotationPolicy,
    calendar:         WeekCalendar,
    schedule_default: ScheduleSpec,
    initial_capital:  f64,
    store:            Arc<dyn Store>,
    universe:         Arc<dyn UniverseSource>,
    prices:           Arc<dyn PriceFeed>,
    in_progress:      Mutex<()>,
    last_ranking:     RwLock<Option<RankingView>>,
    events:           broadcast::Sender<String>,
}

impl Orchestrator {
    pub fn new(
        config:   &AppConfig,
        policy:   RotationPolicy,
        store:    Arc<dyn Store>,
        universe: Arc<dyn UniverseSource>,
        prices:   Arc<dyn PriceFeed>,
        events:   broadcast::Sender<String>,
    ) -> Self {
        Self {
            policy,
            calendar:         config.calendar.clone(),
            schedule_default: config.schedule.clone(),
            initial_capital:  config.initial_capital,
            store,
            universe,
            prices,
            in_progress:      Mutex::new(()),
            last_ranking:     RwLock::new(None),
            events,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn calendar(&self) -> &WeekCalendar {
        &self.calendar
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.try_lock().is_err()
    }

    pub async fn last_ranking(&self) -> Option<RankingView> {
        self.last_ranking.read().await.clone()
    }

    pub fn broadcast(&self, event: &WsEvent) {
        // Err only means nobody is listening
        let _ = self.events.send(event.to_json());
    }

    /// Environment defaults with stored overrides applied.
    pub async fn settings(&self) -> Result<EffectiveSettings, StoreError> {
        let stored = self.store.settings().await?;
        Ok(EffectiveSettings::resolve(&self.schedule_default, self.initial_capital, &stored))
    }

    /// `snapshot` measured against the effective initial value.
    pub async fn performance(&self, snapshot: &PortfolioSnapshot) -> Result<valuation::PortfolioPerformance, StoreError> {
        let settings = self.settings().await?;
        Ok(valuation::performance(snapshot, settings.initial_value))
    }

    pub async fn cooldowns(&self, now: DateTime<Utc>) -> Result<Vec<CooldownStatus>, StoreError> {
        let records = self.store.sold_positions(true).await?;
        Ok(CooldownLedger::from_records(records, &self.policy).statuses(now))
    }

    pub async fn snapshot_window(&self, now: DateTime<Utc>) -> Result<SnapshotWindow, StoreError> {
        let existing = self.store.snapshot_in_week(&self.calendar, now).await?;
        Ok(SnapshotWindow::probe(&self.calendar, now, existing.as_ref()))
    }

    // ── Cycle ────────────────────────────────────────────────────────────────

    pub async fn run_cycle(&self, trigger: CycleTrigger) -> CycleOutcome {
        self.run_cycle_at(trigger, Utc::now()).await
    }

    /// Run one cycle as if the clock read `now`.
    pub async fn run_cycle_at(&self, trigger: CycleTrigger, now: DateTime<Utc>) -> CycleOutcome {
        let Ok(_guard) = self.in_progress.try_lock() else {
            warn!(trigger = trigger.as_str(), "⏳ Cycle refused — another one is running");
            return CycleOutcome::Refused(PolicyRefusal::CycleInProgress);
        };

        info!(trigger = trigger.as_str(), %now, "🔄 Rotation cycle starting");
        self.broadcast(&WsEvent::CycleStarted { trigger: trigger.as_str().to_string(), at: now });

        let outcome = match self.execute(trigger, now).await {
            Ok(report) => CycleOutcome::Completed(Box::new(report)),

            Err(CycleError::Store(StoreError::Refused(refusal))) => {
                info!(reason = %refusal, "🚫 Cycle refused by snapshot gate");
                CycleOutcome::Refused(refusal)
            }

            Err(err @ (CycleError::Fetch(_) | CycleError::NothingRanked)) => {
                let reason = err.to_string();
                warn!(reason = %reason, "⏭️ Cycle skipped — previous snapshot stays latest");
                let entry = NewActivity::new(ActivityAction::Scan, now, format!("Cycle skipped: {reason}"))
                    .metadata(json!({ "trigger": trigger.as_str() }));
                if let Err(log_err) = self.store.append_activity(entry).await {
                    error!(error = %log_err, "Failed to log skipped cycle");
                }
                CycleOutcome::Skipped { reason }
            }

            Err(err) => {
                error!(error = %err, "❌ Cycle failed — nothing written");
                CycleOutcome::Failed { reason: err.to_string() }
            }
        };

        self.broadcast(&match &outcome {
            CycleOutcome::Completed(report) => WsEvent::CycleCompleted {
                snapshot_id: report.snapshot.id,
                sold:        report.plan.to_sell.iter().map(|s| s.ticker.clone()).collect(),
                bought:      report.plan.to_buy.iter().map(|b| b.ticker.clone()).collect(),
                buffer:      report.plan.to_buffer.clone(),
                shortfall:   report.plan.shortfall,
                total_value: report.snapshot.total_value,
            },
            CycleOutcome::Skipped { reason } => WsEvent::CycleSkipped { reason: reason.clone() },
            CycleOutcome::Refused(refusal)   => WsEvent::CycleRefused { reason: refusal.to_string() },
            CycleOutcome::Failed { reason }  => WsEvent::CycleFailed { reason: reason.clone() },
        });

        outcome
    }

    /// Fetch, rank and plan. Touches no state.
    async fn prepare(&self, now: DateTime<Utc>) -> Result<Prepared, CycleError> {
        // ── Universe ─────────────────────────────────────────────────────────
        let universe = self.universe.fetch_universe().await?;
        if universe.len() < UNIVERSE_DEPTH as usize {
            warn!(
                found     = universe.len(),
                shortfall = UNIVERSE_DEPTH as usize - universe.len(),
                "⚠️ Universe below {UNIVERSE_DEPTH} — ranking what is available"
            );
        }

        let latest = self.store.latest_snapshot().await?;
        let held: Vec<Ticker> = latest.as_ref().map(|s| s.tickers()).unwrap_or_default();

        // ── Prices (universe ∪ held, held ones are needed to value sales) ───
        let mut wanted = universe.clone();
        for ticker in &held {
            if !wanted.contains(ticker) {
                wanted.push(ticker.clone());
            }
        }
        let history = self
            .prices
            .get_prices(&wanted, self.policy.lookback_days, now.date_naive())
            .await?;

        // ── Rank ─────────────────────────────────────────────────────────────
        let ranked = ranker::rank(&universe, &history, now.date_naive(), self.policy.lookback_days);
        if ranked.is_empty() {
            return Err(CycleError::NothingRanked);
        }

        // ── Plan ─────────────────────────────────────────────────────────────
        let records = self.store.sold_positions(true).await?;
        let ledger  = CooldownLedger::from_records(records, &self.policy);
        let plan    = engine::rotate(&held, &ranked, self.policy.target_size, &ledger, now);

        Ok(Prepared {
            latest,
            prices: latest_prices(&history),
            marks:  valuation::price_marks(&history, now.date_naive()),
            ranked,
            ledger,
            plan,
            universe_size: universe.len(),
        })
    }

    async fn execute(&self, trigger: CycleTrigger, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        // Cheap early refusal; the authoritative check runs inside the commit
        let existing = self.store.snapshot_in_week(&self.calendar, now).await?;
        self.calendar.admit_cycle(now, existing.as_ref())?;

        let Prepared { latest, ranked, prices, marks, mut ledger, mut plan, universe_size } =
            self.prepare(now).await?;

        *self.last_ranking.write().await = Some(RankingView {
            as_of:  now,
            universe_size,
            ranked: ranked.clone(),
            basket: ZoneBasket::from_ranking(&ranked),
        });

        let settings = self.settings().await?;
        let sim = simulate(SimulationInput {
            latest:          latest.as_ref(),
            ranked:          &ranked,
            prices:          &prices,
            marks:           &marks,
            plan:            &plan,
            target_size:     self.policy.target_size,
            initial_capital: settings.initial_value,
            now,
        });

        // Buys that could not be filled leave their slot empty and their
        // cooldown untouched
        if !sim.unfilled.is_empty() {
            plan.to_buy.retain(|b| !sim.unfilled.contains(&b.ticker));
            plan.shortfall += sim.unfilled.len();
        }

        engine::apply(&plan, &mut ledger, now);
        let cooldowns = ledger.take_changes();

        let top: Vec<&Ticker> = ranked.iter().take(UNIVERSE_DEPTH as usize).map(|r| &r.ticker).collect();
        let scan = NewActivity::new(
            ActivityAction::Scan,
            now,
            format!("Screener scan: {universe_size} tickers, {} ranked", ranked.len()),
        )
        .metadata(json!({ "trigger": trigger.as_str(), "top": top }));

        let mut activity = vec![scan];
        activity.extend(sim.activity);
        activity.push(summary_entry(&plan, &sim.snapshot, now));

        let commit = CycleCommit {
            snapshot:  sim.snapshot,
            cooldowns,
            trades:    sim.trades.clone(),
            activity,
        };

        let stored = self.store.commit_cycle(commit, &self.calendar, now).await?;
        let diff = stored.diff(latest.as_ref());
        let summary = valuation::summarize(&stored.holdings, stored.cash, &prices);
        let performance = valuation::performance(&stored, settings.initial_value);

        info!(
            id        = stored.id,
            sold      = plan.to_sell.len(),
            bought    = plan.to_buy.len(),
            benched   = plan.to_buffer.len(),
            shortfall = plan.shortfall,
            value     = stored.total_value,
            "✅ Rotation cycle complete"
        );

        Ok(CycleReport {
            trigger,
            snapshot:    stored,
            plan,
            trades:      sim.trades,
            diff,
            valuation:   summary,
            performance,
        })
    }

    // ── Preview / Revalue ────────────────────────────────────────────────────

    /// Rank and rotate against current data without writing anything.
    pub async fn preview_at(&self, now: DateTime<Utc>) -> Result<RotationPreview, CycleError> {
        let prepared = self.prepare(now).await?;
        let window = self.snapshot_window(now).await?;

        Ok(RotationPreview {
            as_of:  now,
            basket: ZoneBasket::from_ranking(&prepared.ranked),
            ranked: prepared.ranked,
            plan:   prepared.plan,
            window,
        })
    }

    /// Re-price the latest snapshot. Refused when it is locked.
    pub async fn revalue_latest(&self, now: DateTime<Utc>) -> Result<PortfolioSnapshot, CycleError> {
        let latest = self.store.latest_snapshot().await?.ok_or(CycleError::NoSnapshot)?;
        if latest.locked {
            return Err(PolicyRefusal::SnapshotLocked { id: latest.id }.into());
        }

        let history = if latest.holdings.is_empty() {
            PriceHistory::new()
        } else {
            self.prices
                .get_prices(&latest.tickers(), self.policy.lookback_days, now.date_naive())
                .await?
        };
        let prices = latest_prices(&history);
        let total_value = latest.cash + valuation::value(&latest.holdings, &prices);

        let update = SnapshotUpdate {
            notes:       None,
            total_value: Some(total_value),
            marks:       Some(valuation::price_marks(&history, now.date_naive())),
        };
        let updated = self.store.update_snapshot(latest.id, &update).await?;

        info!(id = updated.id, before = latest.total_value, after = total_value, "💱 Snapshot revalued");
        self.broadcast(&WsEvent::SnapshotUpdated { id: updated.id, total_value });
        Ok(updated)
    }
}

// ─── Simulation ───────────────────────────────────────────────────────────────

struct SimulationInput<'a> {
    latest:          Option<&'a PortfolioSnapshot>,
    ranked:          &'a [RankedTicker],
    prices:          &'a HashMap<Ticker, f64>,
    marks:           &'a HashMap<Ticker, PriceMark>,
    plan:            &'a RotationPlan,
    target_size:     usize,
    initial_capital: f64,
    now:             DateTime<Utc>,
}

struct SimulationOutput {
    snapshot: NewSnapshot,
    trades:   Vec<TradeRecord>,
    activity: Vec<NewActivity>,
    /// Planned buys with no price or no cash.
    unfilled: Vec<Ticker>,
}

/// Book the plan's sells and buys against the previous snapshot's cash and
/// produce the next snapshot. Sells settle first so their proceeds fund the
/// buys.
fn simulate(input: SimulationInput<'_>) -> SimulationOutput {
    let SimulationInput { latest, ranked, prices, marks, plan, target_size, initial_capital, now } = input;

    let ranks: BTreeMap<&str, u32> = ranked.iter().map(|r| (r.ticker.as_str(), r.rank)).collect();
    let mut cash = latest.map_or(initial_capital, |s| s.cash);
    let mut trades = Vec::new();
    let mut activity = Vec::new();
    let mut unfilled = Vec::new();

    // ── Sells ────────────────────────────────────────────────────────────────
    for sell in &plan.to_sell {
        let Some(holding) = latest.and_then(|s| s.holding(&sell.ticker)) else { continue };
        let (price, proceeds) = valuation::sale_proceeds(holding, prices);
        cash += proceeds;

        let rank_text = sell.rank.map_or_else(|| "unranked".to_string(), |r| format!("rank {r}"));
        trades.push(TradeRecord {
            id:                Uuid::new_v4(),
            timestamp:         now,
            ticker:            sell.ticker.clone(),
            action:            TradeAction::Sell,
            rank:              sell.rank,
            price,
            shares:            holding.shares,
            capital_allocated: holding.capital_allocated,
            total_cost:        proceeds,
            cash_remaining:    cash,
            note:              Some(sell.reason.to_string()),
        });
        activity.push(
            NewActivity::new(
                ActivityAction::Sell,
                now,
                format!("Sold {} ({rank_text}, {})", sell.ticker, sell.reason),
            )
            .ticker(sell.ticker.clone())
            .metadata(json!({
                "reason":   sell.reason,
                "rank":     sell.rank,
                "price":    price,
                "shares":   holding.shares,
                "proceeds": proceeds,
                "pnl":      proceeds - holding.capital_allocated,
            })),
        );
    }

    // ── Carried holdings, re-tagged with this week's rank ────────────────────
    let mut holdings: Vec<Holding> = Vec::new();
    if let Some(prev) = latest {
        for ticker in plan.kept.iter().chain(&plan.to_buffer) {
            if let Some(h) = prev.holding(ticker) {
                let rank = ranks.get(ticker.as_str()).copied();
                holdings.push(Holding {
                    current_rank: rank,
                    zone:         rank.and_then(Zone::for_rank),
                    mark:         marks.get(ticker).copied(),
                    ..h.clone()
                });
            }
        }
    }

    // Equal weight over the whole portfolio, not only the cash left
    let equity = cash + valuation::value(&holdings, prices);

    // ── Buys ─────────────────────────────────────────────────────────────────
    for (i, buy) in plan.to_buy.iter().enumerate() {
        let capital = valuation::slot_capital(equity, target_size, cash, plan.to_buy.len() - i);
        let Some(price) = valuation::price_of(prices, &buy.ticker) else {
            warn!(ticker = %buy.ticker, "No price for planned buy — slot left empty");
            unfilled.push(buy.ticker.clone());
            continue;
        };
        let Some(shares) = valuation::shares_for(capital, price) else {
            warn!(ticker = %buy.ticker, capital, "No cash for planned buy — slot left empty");
            unfilled.push(buy.ticker.clone());
            continue;
        };
        cash -= capital;

        holdings.push(Holding {
            ticker:            buy.ticker.clone(),
            rank_at_entry:     buy.rank,
            entry_price:       price,
            shares,
            capital_allocated: capital,
            entry_date:        now,
            current_rank:      Some(buy.rank),
            zone:              Zone::for_rank(buy.rank),
            mark:              marks.get(&buy.ticker).copied(),
        });
        trades.push(TradeRecord {
            id:                Uuid::new_v4(),
            timestamp:         now,
            ticker:            buy.ticker.clone(),
            action:            TradeAction::Buy,
            rank:              Some(buy.rank),
            price,
            shares,
            capital_allocated: capital,
            total_cost:        capital,
            cash_remaining:    cash,
            note:              buy.reentry.then(|| "re-entry after cooldown".to_string()),
        });
        activity.push(
            NewActivity::new(
                ActivityAction::Buy,
                now,
                format!("Bought {} (rank {}, {:+.2}% momentum)", buy.ticker, buy.rank, buy.momentum_pct),
            )
            .ticker(buy.ticker.clone())
            .metadata(json!({
                "rank":     buy.rank,
                "price":    price,
                "shares":   shares,
                "capital":  capital,
                "momentum": buy.momentum_pct,
                "reentry":  buy.reentry,
            })),
        );
    }

    let total_value = cash + valuation::value(&holdings, prices);

    SimulationOutput {
        snapshot: NewSnapshot {
            timestamp: now,
            holdings,
            basket:    ZoneBasket::from_ranking(ranked),
            cash,
            total_value,
            notes:     None,
        },
        trades,
        activity,
        unfilled,
    }
}

fn summary_entry(plan: &RotationPlan, snapshot: &NewSnapshot, now: DateTime<Utc>) -> NewActivity {
    let meta = json!({
        "sold":      plan.to_sell.iter().map(|s| &s.ticker).collect::<Vec<_>>(),
        "bought":    plan.to_buy.iter().map(|b| &b.ticker).collect::<Vec<_>>(),
        "buffer":    plan.to_buffer,
        "rejected":  plan.rejected,
        "shortfall": plan.shortfall,
        "total_value": snapshot.total_value,
    });

    let (action, text) = if plan.first_cycle {
        (ActivityAction::Init, format!("Initial allocation: {} positions", snapshot.holdings.len()))
    } else if plan.is_noop() {
        (ActivityAction::Hold, "No changes this week".to_string())
    } else {
        (
            ActivityAction::Rebalance,
            format!("Weekly rotation: {} sold, {} bought", plan.to_sell.len(), plan.to_buy.len()),
        )
    };

    let text = if plan.shortfall > 0 {
        format!("{text} ({} slots unfilled)", plan.shortfall)
    } else {
        text
    };

    NewActivity::new(action, now, text).metadata(meta)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockPriceFeed, MockScreener};
    use crate::models::{PriceHistory, PricePoint, SaleReason};
    use crate::models::{ActivityLogEntry, SoldPosition};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Tuesday 2025-04-08 10:00 UTC, after the Monday cutoff.
    fn tuesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 8, 10, 0, 0).unwrap()
    }

    fn config() -> AppConfig {
        AppConfig {
            bind_addr:         "127.0.0.1:0".parse().unwrap(),
            screener_url:      "mock".into(),
            price_feed_url:    "mock".into(),
            http_timeout:      std::time::Duration::from_secs(1),
            database_url:      None,
            api_key:           None,
            calendar:          WeekCalendar::default(),
            schedule:          ScheduleSpec::default(),
            scheduler_enabled: false,
            initial_capital:   120_000.0,
        }
    }

    /// Linear prices: ticker i (0-based) gains `20 − i` percent over the window.
    struct LadderFeed;

    #[async_trait]
    impl PriceFeed for LadderFeed {
        fn name(&self) -> &'static str {
            "ladder"
        }

        async fn get_prices(
            &self,
            tickers:       &[Ticker],
            lookback_days: i64,
            as_of:         NaiveDate,
        ) -> Result<PriceHistory, FetchError> {
            Ok(tickers
                .iter()
                .enumerate()
                .map(|(i, t)| {
                    let gain = 1.0 + (20.0 - i as f64) / 100.0;
                    (
                        t.clone(),
                        vec![
                            PricePoint::new(as_of - Duration::days(lookback_days), 100.0),
                            PricePoint::new(as_of, 100.0 * gain),
                        ],
                    )
                })
                .collect())
        }
    }

    struct FailingScreener;

    #[async_trait]
    impl UniverseSource for FailingScreener {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn fetch_universe(&self) -> Result<Vec<Ticker>, FetchError> {
            Err(FetchError::Timeout("screener".into()))
        }
    }

    fn names(n: usize) -> Vec<Ticker> {
        (1..=n).map(|i| format!("T{i:02}")).collect()
    }

    fn orchestrator(universe: Arc<dyn UniverseSource>, prices: Arc<dyn PriceFeed>) -> (Orchestrator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (tx, _) = broadcast::channel(16);
        let orch = Orchestrator::new(&config(), RotationPolicy::default(), store.clone(), universe, prices, tx);
        (orch, store)
    }

    fn ladder(n: usize) -> (Orchestrator, Arc<MemoryStore>) {
        orchestrator(Arc::new(MockScreener { tickers: names(n) }), Arc::new(LadderFeed))
    }

    fn completed(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Completed(report) => *report,
            other => panic!("expected completed cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_cycle_buys_core_band() {
        let (orch, store) = ladder(20);
        let report = completed(orch.run_cycle_at(CycleTrigger::Manual, tuesday()).await);

        let bought: Vec<u32> = report.snapshot.holdings.iter().map(|h| h.rank_at_entry).collect();
        assert_eq!(bought, (4..=13).collect::<Vec<_>>());
        assert_eq!(report.plan.shortfall, 2);
        assert!((report.snapshot.total_value - 120_000.0).abs() < 1e-6);
        // 10 of 12 equal slots deployed
        assert!((report.snapshot.cash - 20_000.0).abs() < 1e-6);

        let log = store.activity_log(50).await.unwrap();
        assert_eq!(log[0].action, ActivityAction::Init);
        assert_eq!(store.trades(50, None).await.unwrap().len(), 10);
        assert!(orch.last_ranking().await.is_some());

        // Bought at the marked price, nothing gained yet
        assert!(report.snapshot.holdings.iter().all(|h| h.mark.map(|m| m.price) == Some(h.entry_price)));
        assert_eq!(report.performance.initial_value, 120_000.0);
        assert!(report.performance.return_pct.abs() < 1e-9);
    }

    #[tokio::test]
    async fn second_cycle_same_week_is_refused() {
        let (orch, store) = ladder(20);
        completed(orch.run_cycle_at(CycleTrigger::Scheduled, tuesday()).await);

        let outcome = orch.run_cycle_at(CycleTrigger::Manual, tuesday() + Duration::hours(3)).await;
        assert!(matches!(outcome, CycleOutcome::Refused(PolicyRefusal::AlreadyExists { .. })));
        assert_eq!(store.snapshot_history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn before_cutoff_is_refused() {
        let (orch, _) = ladder(20);
        // Monday 2025-04-07 09:00 UTC = 11:00 Rome
        let monday_morning = Utc.with_ymd_and_hms(2025, 4, 7, 9, 0, 0).unwrap();
        let outcome = orch.run_cycle_at(CycleTrigger::Manual, monday_morning).await;
        assert!(matches!(outcome, CycleOutcome::Refused(PolicyRefusal::BeforeCutoff { .. })));
    }

    #[tokio::test]
    async fn screener_failure_skips_and_keeps_latest() {
        let (orch, store) = orchestrator(Arc::new(FailingScreener), Arc::new(MockPriceFeed));
        let outcome = orch.run_cycle_at(CycleTrigger::Scheduled, tuesday()).await;

        assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
        assert!(store.latest_snapshot().await.unwrap().is_none());
        let log = store.activity_log(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, ActivityAction::Scan);
    }

    #[tokio::test]
    async fn concurrent_trigger_is_refused() {
        let (orch, _) = ladder(20);
        let _held = orch.in_progress.lock().await;
        assert!(orch.is_running());

        let outcome = orch.run_cycle_at(CycleTrigger::Manual, tuesday()).await;
        assert!(matches!(outcome, CycleOutcome::Refused(PolicyRefusal::CycleInProgress)));
    }

    #[tokio::test]
    async fn next_week_rotates_and_records_cooldowns() {
        let (orch, store) = ladder(20);
        completed(orch.run_cycle_at(CycleTrigger::Scheduled, tuesday()).await);

        // T05/T06 jump to the top, T04 falls out of the screener entirely
        let mut order: Vec<Ticker> = vec!["T05".into(), "T06".into()];
        order.extend(names(20).into_iter().filter(|t| !["T04", "T05", "T06"].contains(&t.as_str())));
        let next = Orchestrator::new(
            &config(),
            RotationPolicy::default(),
            store.clone(),
            Arc::new(MockScreener { tickers: order }),
            Arc::new(LadderFeed),
            broadcast::channel(4).0,
        );

        let report = completed(next.run_cycle_at(CycleTrigger::Scheduled, tuesday() + Duration::days(7)).await);

        let sold: Vec<(&str, SaleReason)> =
            report.plan.to_sell.iter().map(|s| (s.ticker.as_str(), s.reason)).collect();
        assert!(sold.contains(&("T04", SaleReason::DropOut)));
        assert!(sold.contains(&("T05", SaleReason::Top3)));
        assert!(sold.contains(&("T06", SaleReason::Top3)));

        // T07..T13 stay (ranks 6..12); T02, T03, T14 fill three of five slots
        assert_eq!(report.plan.kept.len(), 7);
        let bought: Vec<&str> = report.plan.to_buy.iter().map(|b| b.ticker.as_str()).collect();
        assert_eq!(bought, ["T02", "T03", "T14"]);
        assert_eq!(report.plan.shortfall, 2);

        let active = store.sold_positions(true).await.unwrap();
        assert_eq!(active.len(), 3);
        assert!(report.plan.counted_after() <= 12);
        assert!(report.diff.removed.contains(&"T05".to_string()));
    }

    #[tokio::test]
    async fn preview_writes_nothing() {
        let (orch, store) = ladder(20);
        let preview = orch.preview_at(tuesday()).await.unwrap();

        assert_eq!(preview.plan.to_buy.len(), 10);
        assert!(preview.window.allowed);
        assert!(store.latest_snapshot().await.unwrap().is_none());
        assert!(store.activity_log(10).await.unwrap().is_empty());
        assert!(orch.last_ranking().await.is_none());
    }

    #[tokio::test]
    async fn revalue_refuses_locked_latest() {
        let (orch, store) = ladder(20);
        let report = completed(orch.run_cycle_at(CycleTrigger::Manual, tuesday()).await);

        let revalued = orch.revalue_latest(tuesday() + Duration::hours(1)).await.unwrap();
        assert_eq!(revalued.id, report.snapshot.id);

        store.lock_snapshot(report.snapshot.id).await.unwrap();
        let err = orch.revalue_latest(tuesday() + Duration::hours(2)).await.unwrap_err();
        assert!(matches!(err, CycleError::Store(StoreError::Refused(PolicyRefusal::SnapshotLocked { .. }))));
    }

    #[tokio::test]
    async fn revalue_marks_holdings_and_reports_return() {
        let (orch, _) = ladder(20);
        completed(orch.run_cycle_at(CycleTrigger::Manual, tuesday()).await);

        // Re-priced over the held tickers only, T04 is now first in the ladder
        let revalued = orch.revalue_latest(tuesday() + Duration::hours(1)).await.unwrap();
        let t04 = revalued.holding("T04").unwrap();
        assert_eq!(t04.mark.map(|m| m.price), Some(120.0));

        let perf = orch.performance(&revalued).await.unwrap();
        let first = &perf.holdings[0];
        assert_eq!(first.ticker, "T04");
        assert!((first.change_pct.unwrap() - 3.0 / 117.0 * 100.0).abs() < 1e-9);
        assert!(perf.gain > 0.0);
        assert!((perf.gain - (revalued.total_value - 120_000.0)).abs() < 1e-9);
    }

    /// Delegates to a [`MemoryStore`]; `commit_cycle` reports a broken ledger
    /// while `broken` is set.
    struct BrokenLedgerStore {
        inner:  MemoryStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl Store for BrokenLedgerStore {
        fn backend(&self) -> &'static str {
            "broken"
        }
        async fn latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>, StoreError> {
            self.inner.latest_snapshot().await
        }
        async fn snapshot(&self, id: i64) -> Result<Option<PortfolioSnapshot>, StoreError> {
            self.inner.snapshot(id).await
        }
        async fn snapshot_before(&self, at: DateTime<Utc>) -> Result<Option<PortfolioSnapshot>, StoreError> {
            self.inner.snapshot_before(at).await
        }
        async fn snapshot_history(&self, limit: usize) -> Result<Vec<PortfolioSnapshot>, StoreError> {
            self.inner.snapshot_history(limit).await
        }
        async fn snapshot_in_week(
            &self,
            calendar: &WeekCalendar,
            at:       DateTime<Utc>,
        ) -> Result<Option<PortfolioSnapshot>, StoreError> {
            self.inner.snapshot_in_week(calendar, at).await
        }
        async fn commit_cycle(
            &self,
            commit:   CycleCommit,
            calendar: &WeekCalendar,
            now:      DateTime<Utc>,
        ) -> Result<PortfolioSnapshot, StoreError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(StoreError::Invariant("more than one active cooldown for T05".into()));
            }
            self.inner.commit_cycle(commit, calendar, now).await
        }
        async fn import_snapshot(
            &self,
            snapshot: NewSnapshot,
            calendar: &WeekCalendar,
            now:      DateTime<Utc>,
        ) -> Result<PortfolioSnapshot, StoreError> {
            self.inner.import_snapshot(snapshot, calendar, now).await
        }
        async fn update_snapshot(&self, id: i64, update: &SnapshotUpdate) -> Result<PortfolioSnapshot, StoreError> {
            self.inner.update_snapshot(id, update).await
        }
        async fn lock_snapshot(&self, id: i64) -> Result<PortfolioSnapshot, StoreError> {
            self.inner.lock_snapshot(id).await
        }
        async fn lock_snapshots_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.lock_snapshots_before(before).await
        }
        async fn sold_positions(&self, active_only: bool) -> Result<Vec<SoldPosition>, StoreError> {
            self.inner.sold_positions(active_only).await
        }
        async fn append_activity(&self, entry: NewActivity) -> Result<ActivityLogEntry, StoreError> {
            self.inner.append_activity(entry).await
        }
        async fn activity_log(&self, limit: usize) -> Result<Vec<ActivityLogEntry>, StoreError> {
            self.inner.activity_log(limit).await
        }
        async fn clear_activity_log(&self) -> Result<u64, StoreError> {
            self.inner.clear_activity_log().await
        }
        async fn trades(&self, limit: usize, ticker: Option<&str>) -> Result<Vec<TradeRecord>, StoreError> {
            self.inner.trades(limit, ticker).await
        }
        async fn settings(&self) -> Result<BTreeMap<String, String>, StoreError> {
            self.inner.settings().await
        }
        async fn put_settings(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
            self.inner.put_settings(values).await
        }
    }

    #[tokio::test]
    async fn ledger_invariant_fails_the_cycle_only() {
        let store = Arc::new(BrokenLedgerStore { inner: MemoryStore::new(), broken: AtomicBool::new(false) });
        let mut order: Vec<Ticker> = vec!["T05".into(), "T06".into()];
        order.extend(names(20).into_iter().filter(|t| !["T04", "T05", "T06"].contains(&t.as_str())));

        let first = Orchestrator::new(
            &config(),
            RotationPolicy::default(),
            store.clone(),
            Arc::new(MockScreener { tickers: names(20) }),
            Arc::new(LadderFeed),
            broadcast::channel(4).0,
        );
        let week1 = completed(first.run_cycle_at(CycleTrigger::Scheduled, tuesday()).await);
        let log_before = store.activity_log(100).await.unwrap().len();

        let orch = Orchestrator::new(
            &config(),
            RotationPolicy::default(),
            store.clone(),
            Arc::new(MockScreener { tickers: order }),
            Arc::new(LadderFeed),
            broadcast::channel(4).0,
        );
        store.broken.store(true, Ordering::SeqCst);
        let week2 = tuesday() + Duration::days(7);

        let outcome = orch.run_cycle_at(CycleTrigger::Scheduled, week2).await;
        assert!(matches!(outcome, CycleOutcome::Failed { ref reason } if reason.contains("active cooldown")));

        // Previous snapshot stays latest, nothing of the cycle was written
        assert_eq!(store.latest_snapshot().await.unwrap().unwrap().id, week1.snapshot.id);
        assert_eq!(store.trades(100, None).await.unwrap().len(), 10);
        assert!(store.sold_positions(false).await.unwrap().is_empty());
        assert_eq!(store.activity_log(100).await.unwrap().len(), log_before);
        assert!(!orch.is_running());

        // The orchestrator keeps working once the ledger is sound again
        store.broken.store(false, Ordering::SeqCst);
        let report = completed(orch.run_cycle_at(CycleTrigger::Manual, week2 + Duration::hours(1)).await);
        assert_ne!(report.snapshot.id, week1.snapshot.id);
        assert_eq!(store.sold_positions(true).await.unwrap().len(), 3);
    }
}
