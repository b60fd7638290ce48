use axum::body::Bytes;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use mcphub_core::events::Event;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::AppState;

/// Messages pushed to event-stream subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    /// Connection accepted
    Subscribed { subscription_id: String, host_id: String },
    /// A host event
    Event { event: Event },
    /// The subscriber fell behind and missed events
    Lagged { skipped: u64 },
    /// Error message
    Error { message: String },
}

/// WebSocket handler streaming host events
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    // Subscribe before the upgrade so nothing published after the request is missed
    let events = state.host.subscribe_events();
    let host_id = state.host.host_id().to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, events, host_id))
}

async fn send(socket: &mut WebSocket, message: &WsMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to encode WebSocket message: {}", e);
            true
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(
    mut socket: WebSocket,
    mut events: broadcast::Receiver<Event>,
    host_id: String,
) {
    let confirm = WsMessage::Subscribed {
        subscription_id: uuid::Uuid::new_v4().to_string(),
        host_id,
    };
    if !send(&mut socket, &confirm).await {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let message = match event {
                    Ok(event) => WsMessage::Event { event },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event subscriber lagged by {} event(s)", skipped);
                        WsMessage::Lagged { skipped }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !send(&mut socket, &message).await {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(_))) => {
                        // Respond to ping with pong
                        if socket.send(Message::Pong(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("WebSocket connection closed");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Ignoring WS message from event subscriber: {}", text.as_str());
                        let reply = WsMessage::Error {
                            message: "event stream is read-only".to_string(),
                        };
                        if !send(&mut socket, &reply).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    tracing::info!("WebSocket connection terminated");
}
