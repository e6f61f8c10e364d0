//! # routes
//!
//! Axum router for the dashboard API. Every body is the `{ "ok": bool, ... }`
//! envelope; errors go through [`AppError`](crate::error::AppError).

use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::require_api_key, state::SharedState};

pub mod activity;
pub mod admin;
pub mod monitor;
pub mod portfolio;
pub mod rotation;
pub mod settings;

/// GET /health — liveness, never gated.
pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "ok":          true,
        "status":      "healthy",
        "version":     env!("CARGO_PKG_VERSION"),
        "backend":     state.orchestrator.store().backend(),
        "running":     state.orchestrator.is_running(),
        "uptime_secs": (Utc::now() - state.started_at).num_seconds(),
    }))
}

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health",                    get(health_check))
        // ── Portfolio ─────────────────────────────────────────────────────────
        .route("/api/portfolio/latest",      get(portfolio::get_latest))
        .route("/api/portfolio/history",     get(portfolio::get_history))
        .route("/api/portfolio/revalue",     post(portfolio::revalue_latest))
        .route("/api/portfolio/:id",         get(portfolio::get_snapshot).patch(portfolio::patch_snapshot))
        // ── Ledger ────────────────────────────────────────────────────────────
        .route("/api/activity",              get(activity::get_activity))
        .route("/api/trades",                get(activity::get_trades))
        .route("/api/cooldowns",             get(rotation::get_cooldowns))
        // ── Rotation ──────────────────────────────────────────────────────────
        .route("/api/rankings",              get(rotation::get_rankings))
        .route("/api/rotation/preview",      post(rotation::preview_rotation))
        .route("/api/cycle/run",             post(rotation::run_cycle))
        .route("/api/scheduler/status",      get(rotation::scheduler_status))
        // ── Settings ──────────────────────────────────────────────────────────
        .route("/api/settings",              get(settings::get_settings).put(settings::put_settings))
        // ── Admin ─────────────────────────────────────────────────────────────
        .route("/api/admin/lock",            post(admin::lock_snapshots))
        .route("/api/admin/import",          post(admin::import_snapshots))
        .route("/api/admin/reset-activity",  post(admin::reset_activity))
        // ── Monitor ───────────────────────────────────────────────────────────
        .route("/ws/monitor",                get(monitor::ws_monitor))
        // ── Middleware ────────────────────────────────────────────────────────
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
