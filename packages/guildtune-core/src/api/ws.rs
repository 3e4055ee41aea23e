//! WebSocket event stream.
//!
//! Clients receive the room list on connect, then every broadcast event.
//! A client may narrow the stream to one room with `SUBSCRIBE`; host-level
//! events are delivered regardless. Clients silent for longer than the
//! heartbeat timeout are dropped.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;
use crate::constants::{WS_HEARTBEAT_CHECK_INTERVAL_SECS, WS_HEARTBEAT_TIMEOUT_SECS};
use crate::events::BroadcastEvent;
use crate::session::{QueueSnapshot, RoomId, RoomSummary};

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming WebSocket message envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsIncoming {
    Heartbeat,
    /// Restricts forwarded events to one room, or lifts the filter.
    Subscribe {
        #[serde(default)]
        payload: SubscribeRequest,
    },
    GetQueue {
        payload: RoomRequest,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest {
    #[serde(default)]
    room_id: Option<RoomId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRequest {
    room_id: RoomId,
}

/// Outgoing WebSocket messages.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WsOutgoing {
    InitialState { payload: InitialStatePayload },
    HeartbeatAck,
    Subscribed { payload: SubscribeRequestAck },
    QueueState { payload: QueueStatePayload },
    Error { message: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitialStatePayload {
    rooms: Vec<RoomSummary>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequestAck {
    room_id: Option<RoomId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueStatePayload {
    room_id: RoomId,
    queue: QueueSnapshot,
}

impl WsOutgoing {
    /// Serializes the message to a WebSocket text message.
    fn to_message(&self) -> Option<Message> {
        serde_json::to_string(self)
            .ok()
            .map(|s| Message::Text(s.into()))
    }
}

/// Sends a message, returning `false` once the client is gone.
async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: WsOutgoing) -> bool {
    match msg.to_message() {
        Some(msg) => sender.send(msg).await.is_ok(),
        None => true,
    }
}

/// Whether an event passes a connection's room filter.
fn should_forward(filter: Option<&str>, event: &BroadcastEvent) -> bool {
    match (filter, event.room_id()) {
        (Some(wanted), Some(room)) => wanted == room,
        _ => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Loop
// ─────────────────────────────────────────────────────────────────────────────

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.event_bridge.subscribe();
    let mut last_activity = Instant::now();
    let mut filter: Option<RoomId> = None;

    log::info!(
        "[WS] New connection ({} subscriber(s))",
        state.event_bridge.receiver_count()
    );

    let initial = WsOutgoing::InitialState {
        payload: InitialStatePayload {
            rooms: state.music.rooms(),
        },
    };
    if !send(&mut sender, initial).await {
        log::warn!("[WS] Failed to send initial state, client disconnected");
        return;
    }

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsIncoming>(&text) {
                            Ok(WsIncoming::Heartbeat) => Some(WsOutgoing::HeartbeatAck),
                            Ok(WsIncoming::Subscribe { payload }) => {
                                filter = payload.room_id;
                                Some(WsOutgoing::Subscribed {
                                    payload: SubscribeRequestAck { room_id: filter.clone() },
                                })
                            }
                            Ok(WsIncoming::GetQueue { payload }) => {
                                let queue = state.music.list_queue(&payload.room_id).await;
                                Some(WsOutgoing::QueueState {
                                    payload: QueueStatePayload { room_id: payload.room_id, queue },
                                })
                            }
                            Err(e) => Some(WsOutgoing::Error {
                                message: format!("Unrecognized message: {}", e),
                            }),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => None,
                };
                if let Some(reply) = reply {
                    if !send(&mut sender, reply).await {
                        break;
                    }
                }
            }
            event = broadcast_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !should_forward(filter.as_deref(), &event) {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[WS] Client lagged, {} event(s) dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] Heartbeat timeout");
                    break;
                }
            }
        }
    }

    log::info!("[WS] Connection closed");
}
