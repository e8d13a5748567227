//! Live telemetry WebSocket
//!
//! Each connection is driven by one supervising task that forwards
//! broadcaster messages, handles subscribe/unsubscribe requests and probes
//! liveness with pings. The connection is dropped when no frame arrives
//! within the pong timeout.

use crate::identity::Caller;
use crate::services::broadcast::{Broadcaster, ConnectionId, SubscriptionKey};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use fitcoach_shared::{LiveClientMessage, LiveServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

pub fn live_routes() -> Router<AppState> {
    Router::new().route("/", get(upgrade))
}

/// GET /api/v1/live - Upgrade to a live update stream
///
/// Device subscriptions are open; a user subscription needs the caller's
/// own id in `X-User-Id`.
async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    caller: Option<Caller>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| supervise(socket, state, caller))
}

async fn supervise(socket: WebSocket, state: AppState, caller: Option<Caller>) {
    let broadcaster = state.services.broadcaster.clone();
    let ping_every = state.config.live.ping_interval();
    let pong_timeout = state.config.live.pong_timeout();

    let (connection, mut outbound) = broadcaster.connect();
    let (mut sink, mut inbound) = socket.split();
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);
    let mut last_seen = Instant::now();
    debug!(connection, "Live connection opened");

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if sink.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            frame = inbound.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        let reply = handle_client_message(&broadcaster, connection, caller, &text);
                        match serde_json::to_string(&reply) {
                            Ok(json) => {
                                if sink.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to encode live reply"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => {
                        debug!(connection, error = %e, "Live connection error");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if last_seen.elapsed() > pong_timeout {
                    debug!(connection, "Live connection timed out");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    broadcaster.disconnect(connection);
    debug!(connection, "Live connection closed");
}

fn handle_client_message(
    broadcaster: &Broadcaster,
    connection: ConnectionId,
    caller: Option<Caller>,
    text: &str,
) -> LiveServerMessage {
    let message = match serde_json::from_str::<LiveClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return LiveServerMessage::Error {
                message: format!("Invalid message: {}", e),
            }
        }
    };

    match message {
        LiveClientMessage::Subscribe {
            device_id,
            user_id,
            session_id,
        } => match resolve_key(device_id, user_id, caller) {
            Ok(key) => {
                broadcaster.subscribe(connection, key.clone(), session_id);
                LiveServerMessage::Subscribed { key: key.to_string() }
            }
            Err(message) => LiveServerMessage::Error { message },
        },
        LiveClientMessage::Unsubscribe { device_id, user_id } => {
            match resolve_key(device_id, user_id, caller) {
                Ok(key) => {
                    broadcaster.unsubscribe(connection, &key);
                    LiveServerMessage::Unsubscribed { key: key.to_string() }
                }
                Err(message) => LiveServerMessage::Error { message },
            }
        }
    }
}

fn resolve_key(
    device_id: Option<String>,
    user_id: Option<Uuid>,
    caller: Option<Caller>,
) -> Result<SubscriptionKey, String> {
    match (device_id, user_id) {
        (Some(device), None) if !device.trim().is_empty() => Ok(SubscriptionKey::Device(device.trim().to_string())),
        (None, Some(user)) => match caller {
            Some(caller) if caller.user_id == user => Ok(SubscriptionKey::User(user)),
            _ => Err("Subscribing to a user requires that user's identity".to_string()),
        },
        (Some(_), Some(_)) => Err("Specify either deviceId or userId, not both".to_string()),
        _ => Err("deviceId or userId is required".to_string()),
    }
}
