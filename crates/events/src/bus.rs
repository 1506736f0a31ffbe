//! In-process event bus.
//!
//! The status service publishes here; the API's WebSocket bridge and any
//! in-process listener subscribe. Delivery is best-effort broadcast: with
//! zero receivers an event is simply dropped, which is fine because the job
//! store stays the durable source of truth.

use tokio::sync::broadcast;

use crate::wire::NotificationEvent;

/// Default broadcast capacity. A slow receiver that falls more than this
/// many events behind observes `Lagged` and skips ahead.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: NotificationEvent) {
        // send only errs when there are no receivers; that is not a fault.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
