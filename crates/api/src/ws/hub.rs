use std::collections::{HashMap, HashSet};

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};

use leanloom_core::Timestamp;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type HubSender = mpsc::UnboundedSender<Message>;

/// State of a single WebSocket connection.
pub struct HubConnection {
    /// Channel sender for outbound messages to this connection.
    pub sender: HubSender,
    /// Channels this connection has subscribed to.
    pub channels: HashSet<String>,
    /// When this connection was established.
    pub connected_at: Timestamp,
}

/// Registry of active notification WebSocket connections.
///
/// Events are published per channel; only connections currently subscribed
/// to the channel receive them. Thread-safe via interior `RwLock`; designed
/// to be wrapped in `Arc` and shared across the application.
pub struct NotificationHub {
    connections: RwLock<HashMap<String, HubConnection>>,
}

impl NotificationHub {
    /// Create a new, empty hub.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink. The connection starts with
    /// no channel subscriptions.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = HubConnection {
            sender: tx,
            channels: HashSet::new(),
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection by its ID, dropping all its subscriptions.
    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Subscribe a connection to a channel.
    ///
    /// Returns `false` when the connection is not registered (it raced a
    /// disconnect); subscribing twice is a no-op.
    pub async fn subscribe(&self, conn_id: &str, channel: &str) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(conn_id) {
            Some(conn) => {
                conn.channels.insert(channel.to_string());
                true
            }
            None => false,
        }
    }

    /// Drop one channel subscription. Unknown connections and channels the
    /// connection never subscribed to are no-ops.
    pub async fn unsubscribe(&self, conn_id: &str, channel: &str) {
        if let Some(conn) = self.connections.write().await.get_mut(conn_id) {
            conn.channels.remove(channel);
        }
    }

    /// Send a text frame to every connection subscribed to `channel`.
    ///
    /// Returns the number of connections the frame was sent to. Connections
    /// whose send channels are closed are silently skipped (they are cleaned
    /// up by their own receive loop).
    pub async fn publish(&self, channel: &str, text: &str) -> usize {
        let message = Message::Text(text.into());
        let conns = self.connections.read().await;
        let mut count = 0;
        for conn in conns.values() {
            if conn.channels.contains(channel) {
                let _ = conn.sender.send(message.clone());
                count += 1;
            }
        }
        count
    }

    /// Number of connections currently subscribed to `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.channels.contains(channel))
            .count()
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Ping frame to every connected client.
    ///
    /// Used by the heartbeat task to keep connections alive and detect
    /// stale ones.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops accepting new connections.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all notification connections");
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
