//! Producer behavior: the job row is written first, then the task message.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use leanloom_core::job::JobStatus;
use leanloom_core::tasks::{GenerationTask, TASK_DOCUMENT_GENERATION};
use leanloom_core::{CoreError, DbId};
use leanloom_events::bus::EventBus;
use leanloom_pipeline::{GenerationProducer, JobStatusService, PipelineError};
use leanloom_queue::frames::{parse_client_frame, ClientFrame};
use leanloom_queue::message::TaskMessage;
use leanloom_queue::{QueueConfig, QueueError, QueueTransport};

const WAIT: Duration = Duration::from_secs(2);

/// Accept one connection and stream its parsed frames to the test.
async fn start_sink_broker() -> (String, mpsc::UnboundedReceiver<ClientFrame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (frame_tx, frames) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                if let Ok(frame) = parse_client_frame(&text) {
                    let _ = frame_tx.send(frame);
                }
            }
        }
    });

    (url, frames)
}

async fn connected_transport(url: &str) -> QueueTransport {
    let mut config = QueueConfig::new(url, "documents");
    config.reconnect_delay = Duration::from_millis(100);
    let transport = QueueTransport::new(config);
    transport.connect();
    timeout(WAIT, async {
        while !transport.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transport never connected");
    transport
}

async fn next_publish(frames: &mut mpsc::UnboundedReceiver<ClientFrame>) -> TaskMessage {
    loop {
        let frame = timeout(WAIT, frames.recv())
            .await
            .expect("no frame within timeout")
            .expect("broker task gone");
        if let ClientFrame::Publish { body, .. } = frame {
            return serde_json::from_value(body).unwrap();
        }
    }
}

async fn seed_refs(pool: &PgPool) -> (DbId, DbId) {
    let (owner_id,): (DbId,) =
        sqlx::query_as("INSERT INTO users (email) VALUES ('founder@example.com') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();
    let (idea_id,): (DbId,) =
        sqlx::query_as("INSERT INTO ideas (owner_id, title) VALUES ($1, 'espresso cart') RETURNING id")
            .bind(owner_id)
            .fetch_one(pool)
            .await
            .unwrap();
    (owner_id, idea_id)
}

fn pipeline(pool: &PgPool, queue: QueueTransport) -> (Arc<JobStatusService>, GenerationProducer) {
    let service = Arc::new(JobStatusService::new(pool.clone(), EventBus::new()));
    let producer = GenerationProducer::new(Arc::clone(&service), queue);
    (service, producer)
}

// ---------------------------------------------------------------------------
// request_generation
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn request_generation_creates_a_pending_row_and_enqueues_its_task(pool: PgPool) {
    let (owner_id, idea_id) = seed_refs(&pool).await;
    let (url, mut frames) = start_sink_broker().await;
    let queue = connected_transport(&url).await;
    let (_, producer) = pipeline(&pool, queue);

    let record = producer
        .request_generation(owner_id, idea_id, Some("lean_canvas".to_string()))
        .await
        .unwrap();

    assert_eq!(record.status, JobStatus::Pending);

    let message = next_publish(&mut frames).await;
    assert_eq!(message.task_type, TASK_DOCUMENT_GENERATION);
    let task: GenerationTask = message.payload_as().unwrap();
    assert_eq!(task.job_id, record.id);
    assert_eq!(task.idea_id, idea_id);
    assert_eq!(task.document_type.as_deref(), Some("lean_canvas"));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn enqueue_failure_surfaces_and_leaves_the_row_pending(pool: PgPool) {
    let (owner_id, idea_id) = seed_refs(&pool).await;
    // Transport that never connected: publish fails fast.
    let queue = QueueTransport::new(QueueConfig::new("ws://127.0.0.1:1", "documents"));
    let (service, producer) = pipeline(&pool, queue);

    let result = producer.request_generation(owner_id, idea_id, None).await;

    assert_matches!(result, Err(PipelineError::Queue(QueueError::NotConnected)));

    // The row was still written; a later retry can pick the idea up.
    let row = service.latest_for_idea(idea_id, None).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Pending);
}

// ---------------------------------------------------------------------------
// retry
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn retry_links_the_new_job_to_the_original(pool: PgPool) {
    let (owner_id, idea_id) = seed_refs(&pool).await;
    let (url, mut frames) = start_sink_broker().await;
    let queue = connected_transport(&url).await;
    let (service, producer) = pipeline(&pool, queue);

    let original = producer
        .request_generation(owner_id, idea_id, Some("lean_canvas".to_string()))
        .await
        .unwrap();
    next_publish(&mut frames).await;

    // Simulate a stuck run: the original is mid-generation, not failed.
    service
        .update_status(original.id, JobStatus::Generating, None)
        .await
        .unwrap();

    let retried = producer.retry(original.id).await.unwrap();

    assert_ne!(retried.id, original.id);
    assert_eq!(retried.retry_of_job_id, Some(original.id));
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.document_type, original.document_type);

    let task: GenerationTask = next_publish(&mut frames).await.payload_as().unwrap();
    assert_eq!(task.job_id, retried.id);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn retry_of_a_missing_job_is_not_found(pool: PgPool) {
    let queue = QueueTransport::new(QueueConfig::new("ws://127.0.0.1:1", "documents"));
    let (_, producer) = pipeline(&pool, queue);

    let result = producer.retry(987_654).await;

    assert_matches!(
        result,
        Err(PipelineError::Core(CoreError::NotFound { entity: "job", id: 987_654 }))
    );
}
