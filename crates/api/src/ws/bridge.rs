use std::sync::Arc;

use tokio::sync::broadcast;

use leanloom_events::NotificationEvent;

use crate::ws::hub::NotificationHub;

/// Pump events from the in-process bus onto subscribed WebSocket clients.
///
/// Consumes events from the broadcast channel and republishes each one, as
/// its JSON wire form, to the hub connections subscribed to the event's
/// channel. Delivery is best-effort: a subscriber that is offline when an
/// event fires recovers the state by polling the job store.
///
/// The loop exits when the channel is closed (every bus handle dropped).
pub async fn run_bridge(
    hub: Arc<NotificationHub>,
    mut receiver: broadcast::Receiver<NotificationEvent>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, channel = %event.channel, "Failed to serialize event");
                        continue;
                    }
                };
                let delivered = hub.publish(&event.channel, &text).await;
                tracing::trace!(channel = %event.channel, delivered, "Event bridged");
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Notification bridge lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Event bus closed, notification bridge shutting down");
                break;
            }
        }
    }
}
