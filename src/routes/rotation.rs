//! # routes::rotation
//!
//! | Method | Path                     | Description                                 |
//! |--------|--------------------------|---------------------------------------------|
//! | GET    | `/api/cooldowns`         | active cooldowns                            |
//! | GET    | `/api/rankings`          | last cycle's ranking (memory only)          |
//! | POST   | `/api/rotation/preview`  | dry-run rank + rotate, nothing written      |
//! | POST   | `/api/cycle/run`         | manual cycle, same gate as the scheduler    |
//! | GET    | `/api/scheduler/status`  | next fire time, last outcome, cycle running |

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::{
    error::AppError,
    orchestrator::{CycleOutcome, CycleTrigger},
    state::SharedState,
};

/// GET /api/cooldowns
pub async fn get_cooldowns(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let cooldowns = state.orchestrator.cooldowns(Utc::now()).await?;

    Ok(Json(json!({
        "ok":        true,
        "count":     cooldowns.len(),
        "cooldowns": cooldowns,
    })))
}

/// GET /api/rankings
pub async fn get_rankings(State(state): State<SharedState>) -> impl IntoResponse {
    match state.orchestrator.last_ranking().await {
        Some(view) => Json(json!({ "ok": true, "ranking": view })),
        None => Json(json!({
            "ok":      true,
            "ranking": null,
            "message": "No cycle has ranked the universe since start-up",
        })),
    }
}

/// POST /api/rotation/preview
pub async fn preview_rotation(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let preview = state.orchestrator.preview_at(Utc::now()).await?;
    Ok(Json(json!({ "ok": true, "preview": preview })))
}

/// POST /api/cycle/run — manual trigger. Refusals are 409, skips 200 with
/// `ok: false`.
pub async fn run_cycle(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    info!("🖐️ Manual cycle requested");

    match state.orchestrator.run_cycle(CycleTrigger::Manual).await {
        CycleOutcome::Refused(refusal) => Err(AppError::Refused(refusal)),
        CycleOutcome::Failed { reason } => Err(AppError::Internal(anyhow::anyhow!(reason))),
        outcome @ CycleOutcome::Skipped { .. } => Ok((
            StatusCode::OK,
            Json(json!({ "ok": false, "outcome": outcome })),
        )),
        outcome @ CycleOutcome::Completed(_) => Ok((
            StatusCode::OK,
            Json(json!({ "ok": true, "outcome": outcome })),
        )),
    }
}

/// GET /api/scheduler/status
pub async fn scheduler_status(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let status = state.scheduler.status().await;
    let window = state.orchestrator.snapshot_window(Utc::now()).await?;

    Ok(Json(json!({
        "ok":        true,
        "scheduler": status,
        "window":    window,
        "cutoff":    state.orchestrator.calendar().describe_cutoff(),
    })))
}
