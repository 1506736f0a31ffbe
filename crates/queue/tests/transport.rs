//! `QueueTransport` behavior against a loopback broker endpoint.
//!
//! The loopback broker accepts WebSocket connections on 127.0.0.1, hands
//! each session's parsed client frames and an outbound text sender to the
//! test, and closes the socket when the test drops the session.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use leanloom_core::tasks::{GenerationTask, TASK_DOCUMENT_GENERATION};
use leanloom_queue::frames::{parse_client_frame, BrokerFrame, ClientFrame};
use leanloom_queue::message::TaskMessage;
use leanloom_queue::transport::{QueueConfig, QueueError, QueueTransport, TaskConsumer};

const WAIT: Duration = Duration::from_secs(2);

struct Session {
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    outbound: mpsc::UnboundedSender<String>,
}

struct LoopbackBroker {
    url: String,
    sessions: mpsc::UnboundedReceiver<Session>,
}

async fn start_loopback() -> LoopbackBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (session_tx, sessions) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let session_tx = session_tx.clone();
            tokio::spawn(async move {
                let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let (mut write, mut read) = ws.split();
                let (frame_tx, frames) = mpsc::unbounded_channel();
                let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
                let _ = session_tx.send(Session {
                    frames,
                    outbound: outbound_tx,
                });

                loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                if let Ok(frame) = parse_client_frame(&text) {
                                    let _ = frame_tx.send(frame);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => return,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => return,
                        },
                        out = outbound_rx.recv() => match out {
                            Some(text) => {
                                if write.send(Message::Text(text)).await.is_err() {
                                    return;
                                }
                            }
                            // Test dropped the session: close the socket.
                            None => {
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        },
                    }
                }
            });
        }
    });

    LoopbackBroker { url, sessions }
}

fn fast_transport(url: &str) -> QueueTransport {
    let mut config = QueueConfig::new(url, "documents");
    config.reconnect_delay = Duration::from_millis(100);
    QueueTransport::new(config)
}

async fn next_session(broker: &mut LoopbackBroker) -> Session {
    timeout(WAIT, broker.sessions.recv())
        .await
        .expect("no connection within timeout")
        .expect("listener task gone")
}

async fn next_frame(session: &mut Session) -> ClientFrame {
    timeout(WAIT, session.frames.recv())
        .await
        .expect("no client frame within timeout")
        .expect("session closed")
}

/// The outbound slot is installed just after the session's opening frames,
/// so a test that wants to publish has to wait for it.
async fn wait_connected(transport: &QueueTransport) {
    timeout(WAIT, async {
        while !transport.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transport never connected");
}

fn task_message(job_id: i64) -> TaskMessage {
    TaskMessage::from_payload(
        TASK_DOCUMENT_GENERATION,
        &GenerationTask {
            job_id,
            owner_id: 1,
            idea_id: 1,
            document_type: Some("lean_canvas".to_string()),
        },
    )
    .unwrap()
}

fn deliver_json(delivery_tag: u64, message: &TaskMessage) -> String {
    serde_json::to_string(&BrokerFrame::Deliver {
        delivery_tag,
        body: serde_json::to_value(message).unwrap(),
    })
    .unwrap()
}

struct RecordingConsumer {
    seen: mpsc::UnboundedSender<TaskMessage>,
    fail: bool,
}

#[async_trait]
impl TaskConsumer for RecordingConsumer {
    async fn handle(&self, message: TaskMessage) -> Result<(), QueueError> {
        self.seen.send(message).unwrap();
        if self.fail {
            Err(QueueError::Handler("generation blew up".to_string()))
        } else {
            Ok(())
        }
    }
}

fn recording_consumer(fail: bool) -> (Arc<RecordingConsumer>, mpsc::UnboundedReceiver<TaskMessage>) {
    let (seen, inbox) = mpsc::unbounded_channel();
    (Arc::new(RecordingConsumer { seen, fail }), inbox)
}

// ---------------------------------------------------------------------------
// Connect / declare
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_declares_the_durable_queue() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);

    transport.connect();

    let mut session = next_session(&mut broker).await;
    assert_matches!(
        next_frame(&mut session).await,
        ClientFrame::Declare { queue, durable: true } if queue == "documents"
    );
}

#[tokio::test]
async fn connect_is_idempotent() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);

    transport.connect();
    transport.connect();

    let _session = next_session(&mut broker).await;
    let extra = timeout(Duration::from_millis(150), broker.sessions.recv()).await;
    assert!(extra.is_err(), "second connect opened a second session");
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_fails_fast_when_disconnected() {
    let transport = fast_transport("ws://127.0.0.1:1");

    let result = transport.publish(&task_message(1));

    assert_matches!(result, Err(QueueError::NotConnected));
}

#[tokio::test]
async fn published_tasks_carry_the_persistent_flag() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);

    transport.connect();
    let mut session = next_session(&mut broker).await;
    next_frame(&mut session).await;
    wait_connected(&transport).await;

    let accepted = transport.publish(&task_message(42)).unwrap();
    assert!(accepted);

    let frame = next_frame(&mut session).await;
    let (queue, persistent, body) = match frame {
        ClientFrame::Publish {
            queue,
            persistent,
            body,
        } => (queue, persistent, body),
        other => panic!("expected publish frame, got {other:?}"),
    };
    assert_eq!(queue, "documents");
    assert!(persistent);

    let message: TaskMessage = serde_json::from_value(body).unwrap();
    assert_eq!(message.task_type, TASK_DOCUMENT_GENERATION);
    let task: GenerationTask = message.payload_as().unwrap();
    assert_eq!(task.job_id, 42);
}

#[tokio::test]
async fn publish_fails_fast_once_the_link_drops() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);

    transport.connect();
    let mut session = next_session(&mut broker).await;
    next_frame(&mut session).await;
    wait_connected(&transport).await;

    drop(session);

    // The session notices the close and clears the outbound slot.
    timeout(WAIT, async {
        while transport.publish(&task_message(1)).is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("publish kept succeeding after disconnect");
}

// ---------------------------------------------------------------------------
// Consume / ack
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deliveries_reach_the_handler_and_are_acked() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);
    let (consumer, mut inbox) = recording_consumer(false);

    transport.consume(consumer);
    transport.connect();

    let mut session = next_session(&mut broker).await;
    next_frame(&mut session).await;
    assert_matches!(
        next_frame(&mut session).await,
        ClientFrame::Consume { queue } if queue == "documents"
    );

    session
        .outbound
        .send(deliver_json(7, &task_message(3)))
        .unwrap();

    let handled = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    let task: GenerationTask = handled.payload_as().unwrap();
    assert_eq!(task.job_id, 3);

    assert_matches!(
        next_frame(&mut session).await,
        ClientFrame::Ack { delivery_tag: 7 }
    );
}

#[tokio::test]
async fn handler_failure_still_acks() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);
    let (consumer, mut inbox) = recording_consumer(true);

    transport.consume(consumer);
    transport.connect();

    let mut session = next_session(&mut broker).await;
    next_frame(&mut session).await;
    next_frame(&mut session).await;

    session
        .outbound
        .send(deliver_json(11, &task_message(5)))
        .unwrap();

    timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_matches!(
        next_frame(&mut session).await,
        ClientFrame::Ack { delivery_tag: 11 }
    );
}

#[tokio::test]
async fn redelivery_runs_the_handler_again() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);
    let (consumer, mut inbox) = recording_consumer(false);

    transport.consume(consumer);
    transport.connect();

    let mut session = next_session(&mut broker).await;
    next_frame(&mut session).await;
    next_frame(&mut session).await;

    // At-least-once: the same body under a fresh tag is handled again.
    session
        .outbound
        .send(deliver_json(1, &task_message(9)))
        .unwrap();
    session
        .outbound
        .send(deliver_json(2, &task_message(9)))
        .unwrap();

    timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
    assert_matches!(next_frame(&mut session).await, ClientFrame::Ack { delivery_tag: 1 });
    assert_matches!(next_frame(&mut session).await, ClientFrame::Ack { delivery_tag: 2 });
}

#[tokio::test]
async fn deliveries_without_a_consumer_stay_unacked() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);

    transport.connect();
    let mut session = next_session(&mut broker).await;
    next_frame(&mut session).await;
    wait_connected(&transport).await;

    session
        .outbound
        .send(deliver_json(4, &task_message(2)))
        .unwrap();

    let quiet = timeout(Duration::from_millis(150), session.frames.recv()).await;
    assert!(quiet.is_err(), "unconsumed delivery was acknowledged");
}

// ---------------------------------------------------------------------------
// Reconnect / shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnects_and_redeclares_after_connection_loss() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);
    let (consumer, _inbox) = recording_consumer(false);

    transport.consume(consumer);
    transport.connect();
    let first = next_session(&mut broker).await;

    // Kill the broker side of the connection.
    drop(first);

    // The fresh session re-binds the queue and resumes consumption.
    let mut second = next_session(&mut broker).await;
    assert_matches!(
        next_frame(&mut second).await,
        ClientFrame::Declare { queue, durable: true } if queue == "documents"
    );
    assert_matches!(
        next_frame(&mut second).await,
        ClientFrame::Consume { queue } if queue == "documents"
    );
}

#[tokio::test]
async fn shutdown_closes_the_connection() {
    let mut broker = start_loopback().await;
    let transport = fast_transport(&broker.url);

    transport.connect();
    let mut session = next_session(&mut broker).await;
    next_frame(&mut session).await;

    transport.shutdown();

    let closed = timeout(WAIT, session.frames.recv()).await.unwrap();
    assert!(closed.is_none());
}
