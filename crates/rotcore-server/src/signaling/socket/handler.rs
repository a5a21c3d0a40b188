use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use rotcore_protocol::{ClientEvent, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Inbound, SocketBridge};

pub async fn ws_handler(ws: WebSocketUpgrade, State(bridge): State<Arc<SocketBridge>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, bridge))
}

async fn handle_socket(socket: WebSocket, bridge: Arc<SocketBridge>) {
    let (mut sender, mut receiver) = socket.split();

    let session_id = Uuid::new_v4();

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    bridge.sessions.add(session_id, tx).await;

    if let Err(e) = bridge
        .sessions
        .send(session_id, &ServerEvent::Joined { session_id })
        .await
    {
        tracing::warn!("Failed to greet session {}: {}", session_id, e);
    }

    // Forward messages from the channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    bridge.push(Inbound::Join(session_id));

    loop {
        let msg = tokio::select! {
            _ = bridge.cancel.cancelled() => break,
            msg = receiver.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => bridge.push(Inbound::Event(session_id, event)),
                Err(e) => tracing::warn!("Invalid message from {}: {}", session_id, e),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error for session {}: {}", session_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    bridge.sessions.remove(session_id).await;
    send_task.abort();
    bridge.push(Inbound::Leave(session_id));

    tracing::info!("Session {} disconnected from WebSocket", session_id);
}
