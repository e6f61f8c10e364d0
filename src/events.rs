//! # events
//!
//! [`WsEvent`]: everything pushed to `/ws/monitor` clients.
//!
//! Sent over a `tokio::sync::broadcast::Sender<String>` as pre-serialised
//! JSON so receivers never need to clone the payload types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Ticker;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsEvent {
    /// A cycle acquired the rotation lock.
    CycleStarted {
        trigger: String,
        at:      DateTime<Utc>,
    },

    /// Snapshot committed.
    CycleCompleted {
        snapshot_id: i64,
        sold:        Vec<Ticker>,
        bought:      Vec<Ticker>,
        buffer:      Vec<Ticker>,
        shortfall:   usize,
        total_value: f64,
    },

    /// Collaborator failure or empty ranking; nothing written.
    CycleSkipped {
        reason: String,
    },

    /// Weekly gate said no.
    CycleRefused {
        reason: String,
    },

    CycleFailed {
        reason: String,
    },

    SnapshotUpdated {
        id:          i64,
        total_value: f64,
    },

    SnapshotsLocked {
        count: u64,
    },

    SettingsChanged {
        keys: Vec<String>,
    },
}

impl WsEvent {
    #[inline]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"event":"SERIALIZATION_ERROR"}"#.to_string())
    }
}
