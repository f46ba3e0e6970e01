use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::{debug, warn};

use super::events::{ConnectionEvent, Envelope};
use super::AppState;

/// GET /ws — subscribe to the lifecycle event feed. The first frame is a
/// `connection` event; everything after mirrors the hub broadcasts.
pub async fn ws_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, mut socket: WebSocket) {
    debug!("event feed subscriber connected");

    let hello = ConnectionEvent {
        envelope: Envelope::new("connection"),
        connected: true,
    };
    match serde_json::to_string(&hello) {
        Ok(payload) => {
            if socket.send(Message::Text(payload)).await.is_err() {
                return;
            }
        }
        Err(err) => {
            warn!("connection event serialization failed: {err}");
            return;
        }
    }

    let mut subscription = state.hub.subscribe();

    loop {
        tokio::select! {
            event = subscription.receiver.recv() => {
                match event {
                    Some(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    // Channel closed by unsubscribe elsewhere.
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Inbound frames (pings, client chatter) are ignored.
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    state.hub.unsubscribe(subscription.id);
    debug!("event feed subscriber disconnected");
}
