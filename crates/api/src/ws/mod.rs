//! WebSocket half of the notification bus.
//!
//! Provides the connection registry with per-channel subscriptions, the
//! HTTP upgrade handler, the bus-to-socket bridge, and heartbeat pings.

mod bridge;
mod handler;
mod heartbeat;
pub mod hub;

pub use bridge::run_bridge;
pub use handler::notification_handler;
pub use heartbeat::start_heartbeat;
pub use hub::NotificationHub;
