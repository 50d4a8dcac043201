use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use meshcall_protocol::Envelope;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let connection_id = Uuid::new_v4();
    tracing::info!("connection {} opened", connection_id);

    // Channel for outbound envelopes; the single writer task keeps delivery
    // to this recipient FIFO.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.hub.register_connection(connection_id, tx).await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let envelope: Envelope = match serde_json::from_str(&text) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!("invalid envelope from {}: {}", connection_id, e);
                        continue;
                    }
                };

                state.hub.handle_envelope(connection_id, envelope).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("websocket error on connection {}: {}", connection_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect: registry removal and roster broadcast happen
    // here, whether the peer left cleanly or the socket died.
    state.hub.disconnect(connection_id).await;
    send_task.abort();

    tracing::info!("connection {} closed", connection_id);
}
