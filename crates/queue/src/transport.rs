//! The queue transport itself: one shared connection per process, used by
//! both the producer (`publish`) and the consumer (`consume`).
//!
//! Delivery dispatch is sequential: the session loop awaits the handler for
//! one message before reading the next, then acknowledges. The message is
//! acknowledged even when the handler fails, so handlers that need a durable
//! failure trail must record it themselves before returning.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use leanloom_core::tasks::DOCUMENT_GENERATION_QUEUE;

use crate::frames::{parse_broker_frame, BrokerFrame, ClientFrame};
use crate::message::TaskMessage;

/// Fixed delay between reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Transport configuration.
///
/// Environment variables read by [`QueueConfig::from_env`]:
///
/// | Variable              | Default                      |
/// |-----------------------|------------------------------|
/// | `QUEUE_BROKER_URL`    | `ws://localhost:9901`        |
/// | `QUEUE_NAME`          | `document_generation_queue`  |
/// | `QUEUE_RECONNECT_SECS`| `5`                          |
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub broker_url: String,
    pub queue: String,
    pub reconnect_delay: Duration,
}

impl QueueConfig {
    pub fn new(broker_url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            queue: queue.into(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn from_env() -> Self {
        let broker_url = std::env::var("QUEUE_BROKER_URL")
            .unwrap_or_else(|_| "ws://localhost:9901".to_string());
        let queue = std::env::var("QUEUE_NAME")
            .unwrap_or_else(|_| DOCUMENT_GENERATION_QUEUE.to_string());
        let reconnect_secs: u64 = std::env::var("QUEUE_RECONNECT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .expect("QUEUE_RECONNECT_SECS must be an integer");

        Self {
            broker_url,
            queue,
            reconnect_delay: Duration::from_secs(reconnect_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No broker connection right now; the call failed fast and may be
    /// retried by the caller once the link is back.
    #[error("queue transport is not connected")]
    NotConnected,

    #[error("queue serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A consumer handler rejected a delivery.
    #[error("task handler failed: {0}")]
    Handler(String),
}

/// Consumer seam: one handler invocation per delivered message.
#[async_trait]
pub trait TaskConsumer: Send + Sync {
    async fn handle(&self, message: TaskMessage) -> Result<(), QueueError>;
}

struct QueueShared {
    config: QueueConfig,
    /// Live session's outbound sender; `None` whenever disconnected, which
    /// is what makes `publish` fail fast.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    consumer: Mutex<Option<Arc<dyn TaskConsumer>>>,
    link: Mutex<Option<CancellationToken>>,
}

/// Handle to the process-wide queue connection. Cheap to clone.
#[derive(Clone)]
pub struct QueueTransport {
    shared: Arc<QueueShared>,
}

impl QueueTransport {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                config,
                outbound: Mutex::new(None),
                consumer: Mutex::new(None),
                link: Mutex::new(None),
            }),
        }
    }

    /// Start the connection link and bind the named durable queue.
    ///
    /// Idempotent: calling it while the link is already running is a no-op.
    /// Connection failures are not surfaced here; the link retries forever
    /// on a fixed delay and `publish` reports unavailability per call.
    pub fn connect(&self) {
        let mut link = lock(&self.shared.link);
        if link.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        tokio::spawn(run_link(Arc::clone(&self.shared), cancel.clone()));
        *link = Some(cancel);
    }

    /// Whether a broker session is currently established.
    pub fn is_connected(&self) -> bool {
        lock(&self.shared.outbound).is_some()
    }

    /// Register the consumer handler and start deliveries.
    ///
    /// One consumer per transport; registering again replaces it. Usually
    /// called before [`connect`](Self::connect); when the link is already
    /// up, a `consume` frame is sent on the live session.
    pub fn consume(&self, consumer: Arc<dyn TaskConsumer>) {
        *lock(&self.shared.consumer) = Some(consumer);

        if let Some(sender) = lock(&self.shared.outbound).as_ref() {
            if let Some(text) = frame_text(&ClientFrame::Consume {
                queue: self.shared.config.queue.clone(),
            }) {
                let _ = sender.send(Message::Text(text));
            }
        }
    }

    /// Enqueue a task message with the persistent delivery flag set.
    ///
    /// Returns whether the local send buffer accepted the message (durable
    /// storage is the broker's side of the contract; the buffer is currently
    /// unbounded, so acceptance only fails together with the connection).
    /// Fails fast with [`QueueError::NotConnected`] during a disconnected
    /// window instead of queueing client-side.
    pub fn publish(&self, message: &TaskMessage) -> Result<bool, QueueError> {
        let frame = ClientFrame::Publish {
            queue: self.shared.config.queue.clone(),
            persistent: true,
            body: serde_json::to_value(message)?,
        };
        let text = serde_json::to_string(&frame)?;

        match lock(&self.shared.outbound).as_ref() {
            Some(sender) => sender
                .send(Message::Text(text))
                .map(|_| true)
                .map_err(|_| QueueError::NotConnected),
            None => Err(QueueError::NotConnected),
        }
    }

    /// Stop the link for process shutdown. In-flight handler work finishes;
    /// the close frame goes out on the next loop turn.
    pub fn shutdown(&self) {
        if let Some(cancel) = lock(&self.shared.link).take() {
            cancel.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn frame_text(frame: &ClientFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(error) => {
            tracing::error!(%error, "Failed to encode queue frame");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Connection link
// ---------------------------------------------------------------------------

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsSink = SplitSink<WsStream, Message>;

/// Connect, run a session, retry after a fixed delay until cancelled.
/// Connection errors are logged and never fatal to the process.
async fn run_link(shared: Arc<QueueShared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            connected = connect_async(shared.config.broker_url.as_str()) => match connected {
                Ok((stream, _)) => {
                    tracing::info!(
                        url = %shared.config.broker_url,
                        queue = %shared.config.queue,
                        "Queue broker connected",
                    );
                    run_session(&shared, &cancel, stream).await;
                    *lock(&shared.outbound) = None;
                    if cancel.is_cancelled() {
                        return;
                    }
                    tracing::warn!(
                        delay_secs = shared.config.reconnect_delay.as_secs(),
                        "Queue broker connection lost, reconnecting",
                    );
                }
                Err(error) => {
                    tracing::warn!(%error, "Queue broker connect failed, retrying");
                }
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {}
        }
    }
}

async fn run_session(shared: &Arc<QueueShared>, cancel: &CancellationToken, stream: WsStream) {
    let (mut write, mut read) = stream.split();

    // Bind the durable queue, then start deliveries if a consumer exists.
    let declare = ClientFrame::Declare {
        queue: shared.config.queue.clone(),
        durable: true,
    };
    let Some(text) = frame_text(&declare) else { return };
    if write.send(Message::Text(text)).await.is_err() {
        return;
    }
    if lock(&shared.consumer).is_some() {
        let consume = ClientFrame::Consume {
            queue: shared.config.queue.clone(),
        };
        let Some(text) = frame_text(&consume) else { return };
        if write.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    *lock(&shared.outbound) = Some(outbound_tx);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            out = outbound_rx.recv() => match out {
                Some(message) => {
                    if write.send(message).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_broker_frame(shared, &text, &mut write).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::warn!(%error, "Queue broker read error");
                    return;
                }
                None => return,
            },
        }
    }
}

/// Dispatch one broker frame. Deliveries run the handler to completion and
/// then acknowledge, success or not; the next frame is not read until this
/// one is finished (sequential consumption).
async fn handle_broker_frame(shared: &Arc<QueueShared>, text: &str, write: &mut WsSink) {
    let frame = match parse_broker_frame(text) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::debug!(%error, "Ignoring unknown broker frame");
            return;
        }
    };

    match frame {
        BrokerFrame::Declared { queue } => {
            tracing::debug!(%queue, "Queue declared");
        }
        BrokerFrame::Deliver { delivery_tag, body } => {
            let consumer = lock(&shared.consumer).clone();
            let Some(consumer) = consumer else {
                // Leave the tag unacknowledged so the broker redelivers once
                // a consumer is registered.
                tracing::warn!(delivery_tag, "Delivery without a registered consumer");
                return;
            };

            match serde_json::from_value::<TaskMessage>(body) {
                Ok(message) => {
                    let task_type = message.task_type.clone();
                    match consumer.handle(message).await {
                        Ok(()) => {
                            tracing::debug!(delivery_tag, %task_type, "Task handled");
                        }
                        Err(error) => {
                            tracing::error!(
                                delivery_tag,
                                %task_type,
                                %error,
                                "Task handler failed; message is acknowledged anyway",
                            );
                        }
                    }
                }
                Err(error) => {
                    // An undecodable body would fail identically on every
                    // redelivery; acknowledge it below and move on.
                    tracing::error!(delivery_tag, %error, "Undecodable task message");
                }
            }

            if let Some(text) = frame_text(&ClientFrame::Ack { delivery_tag }) {
                if write.send(Message::Text(text)).await.is_err() {
                    tracing::warn!(delivery_tag, "Failed to send ack before disconnect");
                }
            }
        }
    }
}
