//! # Rotation Tracker — Weekly Momentum-Rotation Portfolio Tracker
//!
//! ```text
//!  ┌─────────────┐  fetch_universe   ┌──────────────────────────────────────┐
//!  │  Screener   │ ────────────────▶ │ Orchestrator                         │
//!  └─────────────┘                   │ ├─ Ranker     (30-day momentum)      │
//!  ┌─────────────┐  get_prices       │ ├─ Cooldowns  (top-3 → 14 days)      │
//!  │ Price feed  │ ────────────────▶ │ ├─ Rotation   (core 4–13, buf 14–15) │
//!  └─────────────┘                   │ └─ Valuation  (equal-weight slots)   │
//!                                    └──────────────┬───────────────────────┘
//!  ┌─────────────┐  weekly trigger                  │ commit_cycle (atomic)
//!  │  Scheduler  │ ─────────────────────────────────┤
//!  └─────────────┘                                  ▼
//!  ┌─────────────┐  /api/*  ws://host/ws/monitor ┌────────────────────────┐
//!  │  Dashboard  │ ◀───────────────────────────▶ │ Store (memory | pg)    │
//!  └─────────────┘                               └────────────────────────┘
//! ```
//!
//! ## Environment Variables
//!
//! | Variable               | Default              | Description                         |
//! |------------------------|----------------------|-------------------------------------|
//! | `BIND_ADDR`            | `0.0.0.0:3000`       | Address Axum listens on             |
//! | `SCREENER_URL`         | Finviz screener      | `mock` → built-in universe          |
//! | `PRICE_FEED_URL`       | Yahoo chart API      | `mock` → synthetic prices           |
//! | `HTTP_TIMEOUT_SECS`    | `10`                 | Per-request collaborator timeout    |
//! | `DATABASE_URL`         | —                    | Postgres (needs `--features postgres`) |
//! | `API_KEY`              | —                    | Gate for write endpoints            |
//! | `SNAPSHOT_TIMEZONE`    | `Europe/Rome`        | Weekly gate timezone                |
//! | `SNAPSHOT_CUTOFF_DAY`  | `mon`                | Weekly gate cutoff day              |
//! | `SNAPSHOT_CUTOFF_TIME` | `18:00`              | Weekly gate cutoff time             |
//! | `SCHEDULER_ENABLED`    | `true`               | Run the weekly background task      |
//! | `SCHEDULER_DAY/TIME/TIMEZONE` | `mon` `19:00` `Europe/Rome` | Default fire time  |
//! | `INITIAL_CAPITAL`      | `150000`             | Cash of the first cycle             |
//! | `ROTATION_TARGET_SIZE` | `12`                 | Counted holdings target             |
//! | `COOLDOWN_TOP3_DAYS`   | `14`                 | Re-entry window after a top-3 sale  |
//! | `REENTRY_MIN_RANK`     | `9`                  | Re-entry needs rank ≥ this          |
//! | `MOMENTUM_LOOKBACK_DAYS` | `30`               | Momentum window                     |
//! | `RUST_LOG`             | `rotation_tracker=debug` | Tracing filter                  |

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod auth;
mod clients;
mod config;
mod engine;
mod error;
mod events;
mod models;
mod orchestrator;
mod policy;
mod routes;
mod scheduler;
mod settings;
mod state;
mod store;

use config::AppConfig;
use orchestrator::Orchestrator;
use policy::RotationPolicy;
use scheduler::Scheduler;
use state::{build_state, BROADCAST_CAPACITY};
use store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env ──────────────────────────────────────────────────────────
    dotenvy::dotenv().ok();

    // ── 2. Structured logging ─────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("rotation_tracker=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!(r#"

  ╔═══════════════════════════════════════════════════════╗
  ║        ROTATION TRACKER — Weekly Momentum             ║
  ║  Ranker · Cooldown · Rotation · Snapshot Ledger       ║
  ╚═══════════════════════════════════════════════════════╝"#);

    // ── 3. Configuration ──────────────────────────────────────────────────────
    let config = AppConfig::from_env().context("Invalid configuration")?;
    let policy = RotationPolicy::from_env();
    info!(
        target_size = policy.target_size,
        cooldown    = policy.top3_cooldown_days,
        lookback    = policy.lookback_days,
        cutoff      = %config.calendar.describe_cutoff(),
        "📐 Rotation policy loaded"
    );

    // ── 4. Store ──────────────────────────────────────────────────────────────
    let store = open_store(&config).await?;
    info!(backend = store.backend(), "💾 Store ready");

    // ── 5. Collaborators ──────────────────────────────────────────────────────
    let client   = clients::http_client();
    let universe = clients::universe_source(&config.screener_url, client.clone(), config.http_timeout);
    let prices   = clients::price_feed(&config.price_feed_url, client, config.http_timeout);
    info!(screener = universe.name(), prices = prices.name(), "🌐 Collaborators ready");

    // ── 6. Orchestrator + scheduler ───────────────────────────────────────────
    let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        policy,
        store,
        universe,
        prices,
        broadcast_tx.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(orchestrator.clone(), config.scheduler_enabled));
    scheduler.clone().spawn();

    // ── 7. Router ─────────────────────────────────────────────────────────────
    if config.api_key.is_none() {
        warn!("API_KEY not set — write endpoints are open (dev mode)");
    }
    let state = build_state(orchestrator, scheduler, broadcast_tx, config.api_key.clone());
    let app = routes::router(state);

    // ── 8. Bind & Serve ───────────────────────────────────────────────────────
    info!(addr = ?config.bind_addr, "🚀 Rotation tracker starting");
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(feature = "postgres")]
async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(store::PgStore::connect(url).await?)),
        None => {
            warn!("DATABASE_URL not set — using in-memory store, nothing survives a restart");
            Ok(Arc::new(store::MemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but this build has no `postgres` feature — ignoring it");
    }
    Ok(Arc::new(store::MemoryStore::new()))
}
