//! # routes::admin
//!
//! Administrative endpoints. All are writes, so all sit behind the API key.
//!
//! | Method | Path                        | Description                                  |
//! |--------|-----------------------------|----------------------------------------------|
//! | POST   | `/api/admin/lock`           | `{ "id": 7 }` or `{ "before": "2025-04-01" }` |
//! | POST   | `/api/admin/import`         | backdated snapshots, stored locked           |
//! | POST   | `/api/admin/reset-activity` | wipe the activity log                        |

use axum::{extract::State, response::IntoResponse, Json};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    engine::guard::localize,
    error::AppError,
    events::WsEvent,
    models::NewSnapshot,
    state::SharedState,
    store::StoreError,
};

/// Most snapshots accepted by one import request.
pub const MAX_IMPORT_BATCH: usize = 520;

#[derive(Debug, Deserialize)]
pub struct LockBody {
    pub id:     Option<i64>,
    /// RFC 3339 instant, or a plain date read as local midnight in the
    /// snapshot timezone.
    pub before: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ImportBody {
    pub snapshots: Vec<NewSnapshot>,
}

// ─── POST /api/admin/lock ─────────────────────────────────────────────────────

pub async fn lock_snapshots(
    State(state): State<SharedState>,
    Json(body):   Json<LockBody>,
) -> Result<impl IntoResponse, AppError> {
    let store = state.orchestrator.store();

    match (body.id, body.before.as_deref()) {
        (Some(id), None) => {
            let snapshot = store.lock_snapshot(id).await?;
            info!(id, "🔒 Snapshot locked");
            state.broadcast(&WsEvent::SnapshotsLocked { count: 1 });
            Ok(Json(json!({ "ok": true, "locked": 1, "snapshot": snapshot })))
        }
        (None, Some(raw)) => {
            let before = parse_before(raw, &state)?;
            let count = store.lock_snapshots_before(before).await?;
            info!(%before, count, "🔒 Snapshots locked");
            state.broadcast(&WsEvent::SnapshotsLocked { count });
            Ok(Json(json!({ "ok": true, "locked": count, "before": before })))
        }
        _ => Err(AppError::BadRequest("Provide exactly one of 'id' or 'before'".into())),
    }
}

fn parse_before(raw: &str, state: &SharedState) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD")))?;
    Ok(localize(state.orchestrator.calendar().tz, date.and_time(NaiveTime::MIN)))
}

// ─── POST /api/admin/import ───────────────────────────────────────────────────

/// Each snapshot is imported on its own; one refusal does not undo the
/// others.
pub async fn import_snapshots(
    State(state): State<SharedState>,
    Json(body):   Json<ImportBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.snapshots.is_empty() {
        return Err(AppError::BadRequest("No snapshots provided".into()));
    }
    if body.snapshots.len() > MAX_IMPORT_BATCH {
        return Err(AppError::BadRequest(format!("At most {MAX_IMPORT_BATCH} snapshots per import")));
    }
    for snapshot in &body.snapshots {
        validate_import(snapshot)?;
    }

    let store = state.orchestrator.store();
    let calendar = state.orchestrator.calendar();
    let now = Utc::now();

    let mut imported = Vec::new();
    let mut refused = Vec::new();

    for snapshot in body.snapshots {
        let timestamp = snapshot.timestamp;
        match store.import_snapshot(snapshot, calendar, now).await {
            Ok(stored) => imported.push(stored.id),
            Err(StoreError::Refused(refusal)) => {
                warn!(%timestamp, reason = %refusal, "Import refused");
                refused.push(json!({ "timestamp": timestamp, "error": refusal.to_string() }));
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(imported = imported.len(), refused = refused.len(), "📥 Import finished");

    Ok(Json(json!({
        "ok":       refused.is_empty(),
        "imported": imported,
        "refused":  refused,
    })))
}

fn validate_import(snapshot: &NewSnapshot) -> Result<(), AppError> {
    let bad = |what: &str| AppError::BadRequest(format!("Snapshot {}: {what}", snapshot.timestamp));

    if !snapshot.total_value.is_finite() || snapshot.total_value < 0.0 {
        return Err(bad("total_value must be a non-negative number"));
    }
    if !snapshot.cash.is_finite() || snapshot.cash < 0.0 {
        return Err(bad("cash must be a non-negative number"));
    }
    for holding in &snapshot.holdings {
        if holding.ticker.trim().is_empty() || holding.shares < 0.0 || holding.entry_price <= 0.0 {
            return Err(bad(&format!("holding '{}' is malformed", holding.ticker)));
        }
    }
    Ok(())
}

// ─── POST /api/admin/reset-activity ───────────────────────────────────────────

pub async fn reset_activity(State(state): State<SharedState>) -> Result<impl IntoResponse, AppError> {
    let removed = state.orchestrator.store().clear_activity_log().await?;
    Ok(Json(json!({ "ok": true, "removed": removed })))
}
