//! `HttpJobSource` against a local HTTP endpoint.

use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::time::timeout;

use leanloom_core::job::JobStatus;
use leanloom_core::{DbId, JobRecord};
use leanloom_observer::{FetchError, HttpJobSource, JobStatusSource};

const WAIT: Duration = Duration::from_secs(2);

fn known_record() -> JobRecord {
    let now = chrono::Utc::now();
    JobRecord {
        id: 7,
        owner_id: 1,
        idea_id: 3,
        document_type: Some("lean_canvas".to_string()),
        status: JobStatus::Generating,
        description: Some("Drafting sections".to_string()),
        progress: 40,
        retry_of_job_id: None,
        created_at: now,
        updated_at: now,
    }
}

async fn get_job(Path(id): Path<DbId>) -> impl IntoResponse {
    match id {
        7 => Json(serde_json::json!({ "data": known_record() })).into_response(),
        500 => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        666 => (StatusCode::OK, "not json at all").into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Job not found", "code": "NOT_FOUND" })),
        )
            .into_response(),
    }
}

async fn serve() -> String {
    let app = Router::new().route("/jobs/{id}", get(get_job));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

#[tokio::test]
async fn fetch_decodes_the_data_envelope() {
    let base = serve().await;
    let source = HttpJobSource::new(&base);

    let record = timeout(WAIT, source.fetch_job(7)).await.unwrap().unwrap();

    let record = record.expect("job should exist");
    assert_eq!(record.id, 7);
    assert_eq!(record.status, JobStatus::Generating);
    assert_eq!(record.progress, 40);
    assert_eq!(record.description.as_deref(), Some("Drafting sections"));
}

#[tokio::test]
async fn missing_job_is_none_not_an_error() {
    let base = serve().await;
    let source = HttpJobSource::new(format!("{base}/"));

    let record = timeout(WAIT, source.fetch_job(123)).await.unwrap().unwrap();
    assert!(record.is_none());
}

#[tokio::test]
async fn server_error_surfaces_the_status_code() {
    let base = serve().await;
    let source = HttpJobSource::new(&base);

    let result = timeout(WAIT, source.fetch_job(500)).await.unwrap();
    assert_matches!(result, Err(FetchError::Status(500)));
}

#[tokio::test]
async fn unparseable_body_is_a_decode_error() {
    let base = serve().await;
    let source = HttpJobSource::new(&base);

    let result = timeout(WAIT, source.fetch_job(666)).await.unwrap();
    assert_matches!(result, Err(FetchError::Decode(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let source = HttpJobSource::new("http://127.0.0.1:1");

    let result = timeout(WAIT, source.fetch_job(1)).await.unwrap();
    assert_matches!(result, Err(FetchError::Transport(_)));
}
