use super::AppState;
use crate::protocol::{ControllerMessage, Encoding, ProtocolError, RunnerId, RunnerMessage};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use metrics::{counter, gauge};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state for a single runner socket
pub struct Connection {
    pub id: Uuid,
    pub runner_id: Option<RunnerId>,
    pub connected_at: Instant,
    pub said_bye: bool,
}

/// Global connection registry
pub type ConnectionRegistry = Arc<RwLock<HashMap<Uuid, Connection>>>;

/// Configuration for WebSocket connections
pub struct WsConfig {
    pub max_message_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(WsConfig::default().max_message_size)
        .on_upgrade(|socket| handle_socket(socket, state))
}

/// Serve one runner connection: every request frame gets exactly one reply
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("New runner connection: {}", connection_id);

    {
        let mut connections = state.connections.write().await;
        connections.insert(
            connection_id,
            Connection {
                id: connection_id,
                runner_id: None,
                connected_at: Instant::now(),
                said_bye: false,
            },
        );
        gauge!("mite_ws_connections_active").set(connections.len() as f64);
    }

    while let Some(result) = socket.recv().await {
        let (encoding, payload) = match result {
            Ok(Message::Text(text)) => (Encoding::Json, text.into_bytes()),
            Ok(Message::Binary(bytes)) => (Encoding::MessagePack, bytes),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!("Connection {} requested close", connection_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", connection_id, e);
                break;
            }
        };

        let reply = match encoding.decode::<RunnerMessage>(&payload) {
            Ok(msg) => handle_runner_message(msg, connection_id, &state).await,
            Err(e) => {
                warn!("Failed to parse runner message: {}", e);
                counter!("mite_ws_invalid_messages_total").increment(1);
                ControllerMessage::Error {
                    message: format!("Invalid message format: {}", e),
                }
            }
        };

        let frame = match to_frame(encoding, &reply) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {} reply: {}", reply.message_type(), e);
                break;
            }
        };
        if socket.send(frame).await.is_err() {
            break;
        }
    }

    // A runner that vanished without saying bye no longer holds work
    let connection = {
        let mut connections = state.connections.write().await;
        let connection = connections.remove(&connection_id);
        gauge!("mite_ws_connections_active").set(connections.len() as f64);
        connection
    };
    if let Some(Connection {
        runner_id: Some(runner_id),
        said_bye: false,
        ..
    }) = connection
    {
        warn!("Runner {} disconnected without bye", runner_id);
        state.controller.bye(runner_id).await;
    }

    info!("Runner connection closed: {}", connection_id);
}

async fn handle_runner_message(
    msg: RunnerMessage,
    connection_id: Uuid,
    state: &AppState,
) -> ControllerMessage {
    if state.debug {
        info!("{} received on {}", msg.message_type(), connection_id);
    }

    let runner_id = match &msg {
        RunnerMessage::Heartbeat { runner_id }
        | RunnerMessage::RequestWork { runner_id, .. }
        | RunnerMessage::Bye { runner_id } => Some(*runner_id),
        RunnerMessage::Hello => None,
    };
    let is_bye = matches!(msg, RunnerMessage::Bye { .. });

    let reply = state.controller.handle(msg).await;

    let runner_id = match &reply {
        ControllerMessage::HelloReply { runner_id, .. } => Some(*runner_id),
        _ => runner_id,
    };
    let mut connections = state.connections.write().await;
    if let Some(conn) = connections.get_mut(&connection_id) {
        if runner_id.is_some() {
            conn.runner_id = runner_id;
        }
        conn.said_bye |= is_bye;
    }

    reply
}

fn to_frame<T: Serialize>(encoding: Encoding, msg: &T) -> Result<Message, ProtocolError> {
    Ok(match encoding {
        Encoding::Json => Message::Text(serde_json::to_string(msg)?),
        Encoding::MessagePack => Message::Binary(encoding.encode(msg)?),
    })
}
