//! # routes::settings
//!
//! | Method | Path            | Description                                   |
//! |--------|-----------------|-----------------------------------------------|
//! | GET    | `/api/settings` | effective settings + raw stored overrides     |
//! | PUT    | `/api/settings` | validate the whole batch, then write          |

use std::collections::BTreeMap;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};
use tracing::info;

use crate::{error::AppError, events::WsEvent, settings, state::SharedState};

/// GET /api/settings
pub async fn get_settings(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let effective = state.orchestrator.settings().await?;
    let stored = state.orchestrator.store().settings().await?;

    Ok(Json(json!({
        "ok":       true,
        "settings": effective,
        "stored":   stored,
        "keys":     settings::KNOWN_KEYS,
    })))
}

/// PUT /api/settings
pub async fn put_settings(
    State(state): State<SharedState>,
    Json(body):   Json<BTreeMap<String, Value>>,
) -> Result<impl IntoResponse, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("No settings provided".into()));
    }

    let values = settings::validate_batch(&body)?;
    state.orchestrator.store().put_settings(&values).await?;

    let keys: Vec<String> = values.keys().cloned().collect();
    info!(?keys, "⚙️ Settings updated");
    state.broadcast(&WsEvent::SettingsChanged { keys: keys.clone() });

    let effective = state.orchestrator.settings().await?;
    Ok(Json(json!({
        "ok":       true,
        "updated":  keys,
        "settings": effective,
    })))
}
