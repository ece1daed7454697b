//! Subscriber-facing HTTP surface: the WebSocket channel plus health and
//! Prometheus endpoints.
//!
//! Each connection gets an unbounded outbound event channel registered
//! with the subscription manager; the socket task shuttles events out and
//! commands in under one `tokio::select!` loop.

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::core::error::LanternError;
use crate::core::room::{DEFAULT_ROOM, Room};
use crate::core::room_manager::RoomManager;
use crate::core::types::CompiledFilter;
use crate::fanout::events::{ClearScope, ClientCommand, ServerEvent};
use crate::fanout::subscription::SubscriptionManager;
use crate::metrics::PerfCounters;

/// Subscriber-side authentication settings (same shared token as ingest)
#[derive(Debug, Clone, Default)]
pub struct SubscriberAuth {
    pub token: Option<String>,
    pub required: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub subs: Arc<SubscriptionManager>,
    pub counters: Arc<PerfCounters>,
    pub auth: SubscriberAuth,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(subscriber_websocket))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// GET /health - liveness probe
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": state.rooms.room_count(),
        "subscribers": state.subs.subscriber_count(),
    }))
}

/// GET /metrics - Prometheus metrics endpoint
async fn metrics_handler() -> Response {
    match crate::metrics::encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            metrics,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// GET /ws?room=<id>&token=<t> - the subscriber channel
async fn subscriber_websocket(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let room = params
        .get("room")
        .filter(|r| !r.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_ROOM.to_string());

    if state.auth.required {
        let presented = params.get("token").map(String::as_str);
        if presented.is_none() || state.auth.token.as_deref() != presented {
            let err = LanternError::AuthFailed;
            warn!("Subscriber rejected: {}", err);
            return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
        }
    }

    info!("Subscriber WebSocket connection for room {}", room);
    ws.on_upgrade(move |socket| handle_subscriber_socket(socket, state, room))
}

async fn handle_subscriber_socket(socket: WebSocket, state: AppState, room: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let subscriber_id = state.subs.register(&room, tx);
    state.counters.subscriber_connected();

    loop {
        tokio::select! {
            // Outbound events (init frame included) from the manager
            Some(event) = rx.recv() => {
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        let err = LanternError::Serialization(e.to_string());
                        warn!("Dropping event for subscriber {}: {}", subscriber_id, err);
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                    warn!("Failed to send to subscriber {}", subscriber_id);
                    break;
                }
            }

            // Inbound commands
            Some(msg) = ws_receiver.next() => {
                match msg {
                    Ok(Message::Text(text)) => handle_command(&state, subscriber_id, &text),
                    Ok(Message::Close(_)) => {
                        info!("Subscriber {} closed connection", subscriber_id);
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error for subscriber {}: {}", subscriber_id, e);
                        break;
                    }
                }
            }

            else => break,
        }
    }

    state.subs.unregister(subscriber_id);
    state.counters.subscriber_disconnected();
    info!("Subscriber {} disconnected", subscriber_id);
}

fn handle_command(state: &AppState, subscriber_id: u64, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            state.subs.send_to(subscriber_id, ServerEvent::Error {
                message: format!("Invalid command: {e}"),
            });
            return;
        }
    };
    apply_command(state, subscriber_id, command);
}

fn current_room(state: &AppState, subscriber_id: u64) -> Option<Arc<Room>> {
    let room_id = state.subs.room_of(subscriber_id)?;
    state.rooms.get(&room_id)
}

fn apply_command(state: &AppState, id: u64, command: ClientCommand) {
    let subs = &state.subs;
    match command {
        ClientCommand::Subscribe { filters } => subs.set_filter(id, filters),
        ClientCommand::Pause => subs.pause(id),
        ClientCommand::Resume => subs.resume(id),
        ClientCommand::GetSince { since_id } => subs.send_since(id, since_id),
        ClientCommand::SwitchRoom { room } => subs.switch_room(id, &room),
        ClientCommand::GetRooms => subs.send_to(id, ServerEvent::Rooms {
            rooms: state.rooms.rooms_info(),
        }),
        ClientCommand::SubscribeStream { channel } => subs.subscribe_stream(id, &channel),
        ClientCommand::UnsubscribeStream { channel } => subs.unsubscribe_stream(id, &channel),
        ClientCommand::PauseStream { channel } => subs.pause_stream(id, &channel),
        ClientCommand::ResumeStream { channel } => subs.resume_stream(id, &channel),
        ClientCommand::GetStreamSubscriptions => {
            let channels = subs.stream_subscriptions(id);
            subs.send_to(id, ServerEvent::StreamSubscriptions { channels });
        }
        ClientCommand::Query {
            filter,
            offset,
            limit,
        } => {
            let Some(room) = current_room(state, id) else {
                return;
            };
            let limit = if limit == 0 { usize::MAX } else { limit };
            let result = room.query(&CompiledFilter::new(filter), offset, limit);
            subs.send_to(id, ServerEvent::QueryResult {
                entries: result.entries,
                total: result.total,
            });
        }
        ClientCommand::GetHistory {
            name,
            from,
            to,
            resolution,
        } => {
            let Some(room) = current_room(state, id) else {
                return;
            };
            let points = room.watch_history(&name, from, to, resolution);
            subs.send_to(id, ServerEvent::WatchHistory { name, points });
        }
        ClientCommand::GetTraces { filter } => {
            let Some(room) = current_room(state, id) else {
                return;
            };
            let (traces, total) = room.list_traces(&filter);
            subs.send_to(id, ServerEvent::Traces { traces, total });
        }
        ClientCommand::GetTrace { trace_id } => {
            let Some(room) = current_room(state, id) else {
                return;
            };
            match room.get_trace(&trace_id) {
                Some(trace) => subs.send_to(id, ServerEvent::TraceDetail { trace }),
                None => subs.send_to(id, ServerEvent::Error {
                    message: format!("Trace not found: {trace_id}"),
                }),
            }
        }
        ClientCommand::GetSpanTree { trace_id } => {
            let Some(room) = current_room(state, id) else {
                return;
            };
            match room.get_span_tree(&trace_id) {
                Some(spans) => subs.send_to(id, ServerEvent::SpanTree { trace_id, spans }),
                None => subs.send_to(id, ServerEvent::Error {
                    message: format!("Trace not found: {trace_id}"),
                }),
            }
        }
        ClientCommand::GetContextKeys => {
            let Some(room) = current_room(state, id) else {
                return;
            };
            let keys = room.context_keys();
            subs.send_to(id, ServerEvent::ContextKeys { keys });
        }
        ClientCommand::ClearLog => clear_room(state, id, ClearScope::Log),
        ClientCommand::ClearWatches => clear_room(state, id, ClearScope::Watches),
        ClientCommand::ClearAll => clear_room(state, id, ClearScope::All),
        ClientCommand::DeleteRoom { room } => match state.rooms.delete_room(&room) {
            Ok(()) => subs.broadcast_all(ServerEvent::Rooms {
                rooms: state.rooms.rooms_info(),
            }),
            Err(e) => subs.send_to(id, ServerEvent::Error {
                message: e.to_string(),
            }),
        },
        ClientCommand::ResizeRoom { room, capacity } => {
            match state.rooms.resize_room(&room, capacity) {
                Ok(()) => subs.send_to(id, ServerEvent::Rooms {
                    rooms: state.rooms.rooms_info(),
                }),
                Err(e) => subs.send_to(id, ServerEvent::Error {
                    message: e.to_string(),
                }),
            }
        }
    }
}

fn clear_room(state: &AppState, id: u64, scope: ClearScope) {
    let Some(room_id) = state.subs.room_of(id) else {
        return;
    };
    let Some(room) = state.rooms.get(&room_id) else {
        return;
    };
    match scope {
        ClearScope::Log => room.clear_log(),
        ClearScope::Watches => room.clear_watches(),
        ClearScope::All => room.clear_all(),
        ClearScope::ProcessFlow => room.clear_process_flow(),
    }
    info!("Subscriber {} cleared {:?} in room {}", id, scope, room_id);
    state
        .subs
        .broadcast_room_event(&room_id, ServerEvent::Clear { scope });
}
