//! # state
//!
//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::events::WsEvent;
use crate::orchestrator::Orchestrator;
use crate::scheduler::Scheduler;

/// Capacity of the live-event channel. Slow WS clients past this lag.
pub const BROADCAST_CAPACITY: usize = 256;

// ─── AppState ─────────────────────────────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler:    Arc<Scheduler>,

    /// Pre-serialised [`WsEvent`] JSON for `/ws/monitor` subscribers. The
    /// orchestrator holds a clone of the same sender.
    pub broadcast_tx: broadcast::Sender<String>,

    /// `None` → dev mode, writes are not gated.
    pub api_key:      Option<String>,

    pub started_at:   DateTime<Utc>,
}

impl AppState {
    /// Broadcast to every WebSocket client. No listeners is not an error.
    pub fn broadcast(&self, event: &WsEvent) {
        let _ = self.broadcast_tx.send(event.to_json());
    }
}

pub type SharedState = Arc<AppState>;

pub fn build_state(
    orchestrator: Arc<Orchestrator>,
    scheduler:    Arc<Scheduler>,
    broadcast_tx: broadcast::Sender<String>,
    api_key:      Option<String>,
) -> SharedState {
    Arc::new(AppState {
        orchestrator,
        scheduler,
        broadcast_tx,
        api_key,
        started_at: Utc::now(),
    })
}
