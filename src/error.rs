//! # error
//!
//! Centralised application error type.
//!
//! Every handler returns `Result<_, AppError>`. The `IntoResponse` impl turns
//! each variant into the JSON envelope the dashboard expects:
//!
//! | Variant      | Status | Body                                       |
//! |--------------|--------|--------------------------------------------|
//! | `BadRequest` | 400    | `{ ok: false, error }`                     |
//! | `NotFound`   | 404    | `{ ok: false, error }`                     |
//! | `Refused`    | 409    | `{ ok: false, refused: true, kind, error }` |
//! | `Upstream`   | 502    | `{ ok: false, error }`                     |
//! | `Internal`   | 500    | `{ ok: false, error }`                     |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::clients::FetchError;
use crate::engine::PolicyRefusal;
use crate::orchestrator::CycleError;
use crate::settings::SettingsError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    /// The request payload was syntactically correct but semantically invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The portfolio ledger said no. Expected, never a 500.
    #[error(transparent)]
    Refused(PolicyRefusal),

    /// Screener or price feed failed.
    #[error("Upstream error: {0}")]
    Upstream(#[from] FetchError),

    /// Catch-all for unexpected failures.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Refused(refusal) => AppError::Refused(refusal),
            StoreError::NotFound(id)     => AppError::NotFound(format!("Snapshot {id} not found")),
            other                        => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<CycleError> for AppError {
    fn from(err: CycleError) -> Self {
        match err {
            CycleError::Fetch(fetch) => AppError::Upstream(fetch),
            CycleError::Store(store) => store.into(),
            CycleError::NothingRanked => {
                AppError::Upstream(FetchError::Empty("no ticker had enough price data to rank".into()))
            }
            CycleError::NoSnapshot => AppError::NotFound("No snapshot yet".into()),
        }
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<PolicyRefusal> for AppError {
    fn from(refusal: PolicyRefusal) -> Self {
        AppError::Refused(refusal)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Refused(refusal) => return refused(&refusal),
            AppError::BadRequest(msg)  => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg)    => (StatusCode::NOT_FOUND, msg),
            AppError::Upstream(err)    => (StatusCode::BAD_GATEWAY, err.to_string()),
            AppError::Internal(err)    => {
                error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}"))
            }
        };

        let body = Json(json!({
            "ok":    false,
            "error": message,
        }));

        (status, body).into_response()
    }
}

fn refused(refusal: &PolicyRefusal) -> Response {
    let kind = serde_json::to_value(refusal)
        .ok()
        .and_then(|v| v.get("kind").cloned());

    let body = Json(json!({
        "ok":      false,
        "refused": true,
        "kind":    kind,
        "error":   refusal.to_string(),
    }));

    (StatusCode::CONFLICT, body).into_response()
}
