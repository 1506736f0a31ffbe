//! Client side of the notification bus.
//!
//! One `BusClient` per process multiplexes every channel subscription over a
//! single WebSocket connection. The connection is reference-counted by live
//! subscriptions: the first `subscribe` starts the link, dropping the last
//! [`ChannelSubscription`] tears it down. While subscriptions exist the link
//! reconnects forever on a fixed delay and replays `subscribe` control
//! frames for every registered channel, so subscribers keep receiving events
//! after a broker restart without re-subscribing themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::wire::{parse_event, ControlFrame, NotificationEvent};

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// WebSocket URL of the notification endpoint,
    /// e.g. `ws://localhost:3001/ws/notifications`.
    pub url: String,
    pub reconnect_delay: Duration,
}

impl BusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

/// Seam between event consumers and the bus, so consumers (and their tests)
/// do not need a live socket.
pub trait EventSubscriber: Send + Sync {
    /// Register for all events published to `channel`. Dropping the returned
    /// subscription unregisters the handler.
    fn subscribe_channel(&self, channel: &str) -> ChannelSubscription;
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

type SubscriberId = u64;

/// A live channel subscription. Dropping it synchronously removes the
/// handler from the registry; when it was the last one process-wide, the
/// underlying connection is torn down (idle-disconnect).
pub struct ChannelSubscription {
    channel: String,
    events: mpsc::UnboundedReceiver<NotificationEvent>,
    _guard: SubscriptionGuard,
}

impl ChannelSubscription {
    /// Build a subscription backed by an arbitrary unregister action.
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::UnboundedReceiver<NotificationEvent>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            _guard: SubscriptionGuard {
                on_drop: Some(Box::new(on_drop)),
            },
        }
    }

    /// Subscription with no unregister action (test fakes).
    pub fn detached(
        channel: impl Into<String>,
        events: mpsc::UnboundedReceiver<NotificationEvent>,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            _guard: SubscriptionGuard { on_drop: None },
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event on this channel. `None` only after the registry side has
    /// gone away entirely.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        self.events.recv().await
    }
}

struct SubscriptionGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.on_drop.take() {
            release();
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Registry {
    next_id: SubscriberId,
    /// channel -> subscriber id -> event sender. Channel entries are removed
    /// as soon as their last subscriber drops.
    channels: HashMap<String, HashMap<SubscriberId, mpsc::UnboundedSender<NotificationEvent>>>,
    total: usize,
}

struct LinkHandle {
    cancel: CancellationToken,
    control_tx: mpsc::UnboundedSender<ControlFrame>,
}

struct BusShared {
    config: BusConfig,
    registry: Mutex<Registry>,
    link: Mutex<Option<LinkHandle>>,
}

/// Process-wide notification bus client. Cheap to clone.
#[derive(Clone)]
pub struct BusClient {
    shared: Arc<BusShared>,
}

impl BusClient {
    pub fn new(config: BusConfig) -> Self {
        Self {
            shared: Arc::new(BusShared {
                config,
                registry: Mutex::new(Registry::default()),
                link: Mutex::new(None),
            }),
        }
    }

    /// Register a subscriber for `channel`.
    ///
    /// The first subscription process-wide lazily starts the connection
    /// link; an additional channel on a live link is announced with a
    /// `subscribe` control frame. Multiple subscribers on one channel each
    /// receive every event.
    pub fn subscribe(&self, channel: &str) -> ChannelSubscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let (first_overall, new_channel, id) = {
            let mut registry = lock(&self.shared.registry);
            let id = registry.next_id;
            registry.next_id += 1;

            let entry = registry.channels.entry(channel.to_string()).or_default();
            let new_channel = entry.is_empty();
            entry.insert(id, tx);
            registry.total += 1;

            (registry.total == 1, new_channel, id)
        };

        if first_overall {
            self.start_link();
        } else if new_channel {
            // The link replays the full channel set on every (re)connect, so
            // this frame only matters for a currently-healthy session.
            self.send_control(ControlFrame::Subscribe {
                channel: channel.to_string(),
            });
        }

        let shared = Arc::clone(&self.shared);
        let release_channel = channel.to_string();
        ChannelSubscription::new(channel, rx, move || {
            release(&shared, &release_channel, id);
        })
    }

    /// Number of live subscriptions, across all channels.
    pub fn subscription_count(&self) -> usize {
        lock(&self.shared.registry).total
    }

    fn start_link(&self) {
        let mut link = lock(&self.shared.link);
        if link.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(
            Arc::clone(&self.shared),
            cancel.clone(),
            control_rx,
        ));
        *link = Some(LinkHandle { cancel, control_tx });
    }

    fn send_control(&self, frame: ControlFrame) {
        if let Some(handle) = lock(&self.shared.link).as_ref() {
            let _ = handle.control_tx.send(frame);
        }
    }
}

impl EventSubscriber for BusClient {
    fn subscribe_channel(&self, channel: &str) -> ChannelSubscription {
        self.subscribe(channel)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Unregister one subscriber; called from the subscription guard's drop.
fn release(shared: &Arc<BusShared>, channel: &str, id: SubscriberId) {
    let (last_overall, channel_emptied) = {
        let mut registry = lock(&shared.registry);
        let registry = &mut *registry;
        let mut channel_emptied = false;
        if let Some(entry) = registry.channels.get_mut(channel) {
            if entry.remove(&id).is_some() {
                registry.total -= 1;
            }
            if entry.is_empty() {
                registry.channels.remove(channel);
                channel_emptied = true;
            }
        }
        (registry.total == 0, channel_emptied)
    };

    if last_overall {
        if let Some(handle) = lock(&shared.link).take() {
            handle.cancel.cancel();
            tracing::debug!("Last bus subscription dropped, closing link");
        }
    } else if channel_emptied {
        if let Some(handle) = lock(&shared.link).as_ref() {
            let _ = handle.control_tx.send(ControlFrame::Unsubscribe {
                channel: channel.to_string(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Connection link
// ---------------------------------------------------------------------------

/// Connect, run a session, and retry on a fixed delay until cancelled.
async fn run_link(
    shared: Arc<BusShared>,
    cancel: CancellationToken,
    mut control_rx: mpsc::UnboundedReceiver<ControlFrame>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            connected = connect_async(&shared.config.url) => match connected {
                Ok((stream, _)) => {
                    tracing::info!(url = %shared.config.url, "Notification bus connected");
                    run_session(&shared, &cancel, &mut control_rx, stream).await;
                    if cancel.is_cancelled() {
                        return;
                    }
                    tracing::warn!(
                        delay_secs = shared.config.reconnect_delay.as_secs(),
                        "Notification bus connection lost, reconnecting",
                    );
                }
                Err(error) => {
                    tracing::warn!(%error, "Notification bus connect failed, retrying");
                }
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {}
        }
    }
}

async fn run_session<S>(
    shared: &Arc<BusShared>,
    cancel: &CancellationToken,
    control_rx: &mut mpsc::UnboundedReceiver<ControlFrame>,
    stream: tokio_tungstenite::WebSocketStream<S>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = stream.split();

    // Replay the current channel set so subscriptions survive reconnects.
    let channels: Vec<String> = lock(&shared.registry).channels.keys().cloned().collect();
    for channel in channels {
        let frame = ControlFrame::Subscribe { channel };
        let Some(text) = frame_text(&frame) else { continue };
        if write.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            frame = control_rx.recv() => match frame {
                Some(frame) => {
                    let Some(text) = frame_text(&frame) else { continue };
                    if write.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                // Client itself was dropped; the link has no owner left.
                None => return,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch_event(shared, &text),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::warn!(%error, "Notification bus read error");
                    return;
                }
                None => return,
            },
        }
    }
}

fn frame_text(frame: &ControlFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(error) => {
            tracing::error!(%error, "Failed to encode control frame");
            None
        }
    }
}

/// Route one incoming event to every subscriber of its channel.
fn dispatch_event(shared: &Arc<BusShared>, text: &str) {
    let event = match parse_event(text) {
        Ok(event) => event,
        Err(error) => {
            tracing::debug!(%error, "Ignoring unparseable bus frame");
            return;
        }
    };

    let registry = lock(&shared.registry);
    if let Some(subscribers) = registry.channels.get(&event.channel) {
        for sender in subscribers.values() {
            let _ = sender.send(event.clone());
        }
    }
}
