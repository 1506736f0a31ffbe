use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use leanloom_events::wire::{parse_control, ControlFrame};

use crate::state::AppState;
use crate::ws::hub::NotificationHub;

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with the
/// [`NotificationHub`] and managed by two tasks (sender + receiver).
pub async fn notification_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Manage a single notification connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with the hub.
///   2. Spawns a sender task that forwards messages from the hub channel.
///   3. Processes inbound subscribe/unsubscribe frames on the current task.
///   4. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "Notification client connected");

    // Register and get the receiver for outbound messages.
    let mut rx = hub.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "Notification sink closed");
                break;
            }
        }
    });

    // Receiver loop: process inbound control frames.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => handle_control(&hub, &conn_id, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Notification receive error");
                break;
            }
        }
    }

    // Clean up: remove connection and abort sender task.
    hub.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "Notification client disconnected");
}

/// Apply one subscribe/unsubscribe control frame.
///
/// Unparseable frames are logged and dropped; the connection stays open.
async fn handle_control(hub: &NotificationHub, conn_id: &str, text: &str) {
    match parse_control(text) {
        Ok(ControlFrame::Subscribe { channel }) => {
            hub.subscribe(conn_id, &channel).await;
            tracing::debug!(conn_id = %conn_id, channel = %channel, "Channel subscribed");
        }
        Ok(ControlFrame::Unsubscribe { channel }) => {
            hub.unsubscribe(conn_id, &channel).await;
            tracing::debug!(conn_id = %conn_id, channel = %channel, "Channel unsubscribed");
        }
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, error = %e, "Ignoring unparseable control frame");
        }
    }
}
