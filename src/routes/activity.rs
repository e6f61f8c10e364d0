//! # routes::activity
//!
//! | Method | Path                         | Description              |
//! |--------|------------------------------|--------------------------|
//! | GET    | `/api/activity?limit=`       | activity log, newest first |
//! | GET    | `/api/trades?limit=&ticker=` | simulated trades         |

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, state::SharedState};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit:  Option<usize>,
    pub ticker: Option<String>,
}

fn clamp(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// GET /api/activity
pub async fn get_activity(
    State(state): State<SharedState>,
    Query(query): Query<ActivityQuery>,
) -> Result<impl IntoResponse, AppError> {
    let entries = state.orchestrator.store().activity_log(clamp(query.limit)).await?;

    Ok(Json(json!({
        "ok":      true,
        "count":   entries.len(),
        "entries": entries,
    })))
}

/// GET /api/trades
pub async fn get_trades(
    State(state): State<SharedState>,
    Query(query): Query<TradesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let ticker = query
        .ticker
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_uppercase);

    let trades = state
        .orchestrator
        .store()
        .trades(clamp(query.limit), ticker.as_deref())
        .await?;

    Ok(Json(json!({
        "ok":     true,
        "count":  trades.len(),
        "trades": trades,
    })))
}
