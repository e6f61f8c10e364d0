//! # routes::monitor
//!
//! `GET /ws/monitor` — live cycle events for the dashboard.
//!
//! On connect the client receives one `SNAPSHOT` frame (latest snapshot,
//! scheduler status), then every [`WsEvent`](crate::events::WsEvent) as a JSON
//! text frame.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::state::SharedState;

pub async fn ws_monitor(
    ws:           WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let mut rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    info!("🔌 WebSocket client connected");

    // ── Current state first ───────────────────────────────────────────────────
    let latest = match state.orchestrator.store().latest_snapshot().await {
        Ok(latest) => latest,
        Err(err) => {
            warn!(error = %err, "Could not load latest snapshot for WS client");
            None
        }
    };
    let hello = json!({
        "event":     "SNAPSHOT",
        "snapshot":  latest,
        "scheduler": state.scheduler.status().await,
        "running":   state.orchestrator.is_running(),
    })
    .to_string();

    if sender.send(Message::Text(hello)).await.is_err() {
        return;
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(json_str) => {
                        if sender.send(Message::Text(json_str)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("WS client lagged, skipped {n} events");
                    }
                    Err(_) => break,
                }
            }

            result = receiver.next() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("🔌 WebSocket client disconnected");
}
