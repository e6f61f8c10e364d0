//! # routes::portfolio
//!
//! | Method | Path                            | Description                              |
//! |--------|---------------------------------|------------------------------------------|
//! | GET    | `/api/portfolio/latest`         | latest snapshot + valuation summary      |
//! | GET    | `/api/portfolio/history?limit=` | snapshots, newest first                  |
//! | GET    | `/api/portfolio/:id`            | one snapshot (+ diff to its predecessor) |
//! | PATCH  | `/api/portfolio/:id`            | update notes, refused when locked        |
//! | POST   | `/api/portfolio/revalue`        | re-price the latest open snapshot        |

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    engine::valuation::ValuationSummary,
    error::AppError,
    events::WsEvent,
    models::{SnapshotUpdate, Zone},
    state::SharedState,
};

pub const DEFAULT_HISTORY_LIMIT: usize = 52;
pub const MAX_HISTORY_LIMIT: usize = 520;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NotesBody {
    pub notes: String,
}

/// GET /api/portfolio/latest
pub async fn get_latest(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let store = state.orchestrator.store();
    let latest = store.latest_snapshot().await?;
    let window = state.orchestrator.snapshot_window(Utc::now()).await?;

    let Some(snapshot) = latest else {
        return Ok(Json(json!({
            "ok":       true,
            "snapshot": null,
            "window":   window,
        })));
    };

    let previous = store.snapshot_before(snapshot.timestamp).await?;

    let zones = json!({
        "take_profit": snapshot.holdings_in(Zone::TakeProfit).count(),
        "core":        snapshot.holdings_in(Zone::Core).count(),
        "buffer":      snapshot.holdings_in(Zone::Buffer).count(),
    });

    let performance = state.orchestrator.performance(&snapshot).await?;

    Ok(Json(json!({
        "ok":          true,
        "valuation":   ValuationSummary::recorded(&snapshot),
        "performance": performance,
        "zones":       zones,
        "diff":        snapshot.diff(previous.as_ref()),
        "snapshot":    snapshot,
        "window":      window,
    })))
}

/// GET /api/portfolio/history?limit=
pub async fn get_history(
    State(state):  State<SharedState>,
    Query(query):  Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let snapshots = state.orchestrator.store().snapshot_history(limit).await?;

    Ok(Json(json!({
        "ok":        true,
        "count":     snapshots.len(),
        "snapshots": snapshots,
    })))
}

/// GET /api/portfolio/:id
pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path(id):     Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.orchestrator.store();
    let snapshot = store.snapshot(id).await?.ok_or(AppError::NotFound(format!("Snapshot {id} not found")))?;

    let previous = store.snapshot_before(snapshot.timestamp).await?;

    let performance = state.orchestrator.performance(&snapshot).await?;

    Ok(Json(json!({
        "ok":          true,
        "valuation":   ValuationSummary::recorded(&snapshot),
        "performance": performance,
        "diff":        snapshot.diff(previous.as_ref()),
        "snapshot":    snapshot,
    })))
}

/// PATCH /api/portfolio/:id
pub async fn patch_snapshot(
    State(state): State<SharedState>,
    Path(id):     Path<i64>,
    Json(body):   Json<NotesBody>,
) -> Result<impl IntoResponse, AppError> {
    let update = SnapshotUpdate { notes: Some(body.notes), ..Default::default() };
    let snapshot = state.orchestrator.store().update_snapshot(id, &update).await?;

    info!(id, "📝 Snapshot notes updated");
    state.broadcast(&WsEvent::SnapshotUpdated { id, total_value: snapshot.total_value });

    Ok(Json(json!({
        "ok":       true,
        "snapshot": snapshot,
    })))
}

/// POST /api/portfolio/revalue
pub async fn revalue_latest(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.orchestrator.revalue_latest(Utc::now()).await?;
    let performance = state.orchestrator.performance(&snapshot).await?;

    Ok(Json(json!({
        "ok":          true,
        "valuation":   ValuationSummary::recorded(&snapshot),
        "performance": performance,
        "snapshot":    snapshot,
    })))
}
