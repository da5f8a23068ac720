//! Live tally channel over WebSocket.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::subscription::ChannelHandle;

/// GET /ws
pub async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut rx) = ChannelHandle::channel();
    let channel_id = handle.id();

    info!("Viewer {} connected", channel_id);

    // Forward queued server messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode message for {}: {}", channel_id, e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_text(&state, &handle, text.as_str()).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handle_text(&state, &handle, text).await,
                Err(_) => reply(&handle, error_message("Binary frames must be UTF-8 JSON")),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for {}: {}", channel_id, e);
                break;
            }
        }
    }

    state.registry.unsubscribe(&channel_id);
    send_task.abort();

    info!("Viewer {} disconnected", channel_id);
}

async fn handle_text(state: &AppState, handle: &ChannelHandle, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => handle_client_message(state, handle, msg).await,
        Err(e) => {
            debug!("Unparseable message from {}: {}", handle.id(), e);
            reply(handle, error_message(format!("Invalid message: {}", e)));
        }
    }
}

async fn handle_client_message(state: &AppState, handle: &ChannelHandle, msg: ClientMessage) {
    match msg {
        ClientMessage::JoinPoll { poll_id } => {
            // watch() sends `joined` and the current tally itself
            match state.coordinator.watch(poll_id, handle.clone()).await {
                Ok(snapshot) => debug!(
                    "Viewer {} joined poll {} at {} votes",
                    handle.id(),
                    poll_id,
                    snapshot.total()
                ),
                Err(e) if e.status().is_server_error() => {
                    warn!("Viewer {} failed to join poll {}: {}", handle.id(), poll_id, e);
                    reply(handle, error_message("Failed to join poll"));
                }
                Err(e) => reply(handle, error_message(e.to_string())),
            }
        }
        ClientMessage::LeavePoll => {
            if let Some(poll_id) = state.registry.unsubscribe(&handle.id()) {
                debug!("Viewer {} left poll {}", handle.id(), poll_id);
            }
            reply(handle, ServerMessage::Left);
        }
        ClientMessage::Ping => reply(handle, ServerMessage::Pong),
    }
}

fn reply(handle: &ChannelHandle, msg: ServerMessage) {
    if handle.send(msg).is_err() {
        debug!("Viewer {} went away before reply", handle.id());
    }
}

fn error_message(message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        message: message.into(),
    }
}
