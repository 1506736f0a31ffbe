//! Notification fan-out for the generation pipeline.
//!
//! Building blocks:
//! - [`wire`]: the JSON event and control-frame formats shared by the server
//!   endpoint and every client.
//! - [`bus::EventBus`]: in-process broadcast hub the status service publishes
//!   into; the API bridges it onto WebSocket connections.
//! - [`client::BusClient`]: client-side subscription manager over one shared
//!   WebSocket connection, with lazy connect, idle disconnect, and automatic
//!   resubscribe after reconnect.

pub mod bus;
pub mod client;
pub mod wire;

pub use bus::EventBus;
pub use client::{BusClient, BusConfig, ChannelSubscription, EventSubscriber};
pub use wire::{EventData, EventKind, NotificationEvent};
