//! The browser websocket: replay on connect, then live broadcast, reading
//! envelope batches back the other way.

use super::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use see_protocol::decode_batches;
use tracing::{error, info, warn};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (peer, mut frames) = match state.vis.attach_peer().await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to encode replay state for new peer");
            return;
        }
    };
    info!(peer, "browser connected");

    let (mut sender, mut receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => recv_frame(&state, peer, text.as_bytes()).await,
            Ok(Message::Binary(bytes)) => recv_frame(&state, peer, &bytes).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    state.vis.hub.detach(peer).await;
    writer.abort();
    info!(peer, "browser disconnected");
}

/// One websocket message may carry several concatenated batches; a bare
/// array with no trailing newline is fine. A malformed frame is logged and
/// dropped without closing the socket.
async fn recv_frame(state: &AppState, peer: u64, bytes: &[u8]) {
    match decode_batches(bytes) {
        Ok(batches) => {
            for batch in batches {
                state.vis.recv_from_client(batch).await;
            }
        }
        Err(e) => warn!(peer, error = %e, "dropping malformed websocket batch"),
    }
}
