//! Shared harness for API integration tests: state and router construction
//! mirroring `main.rs`, request helpers, and queue transport stand-ins.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use leanloom_api::config::ServerConfig;
use leanloom_api::routes;
use leanloom_api::state::AppState;
use leanloom_api::ws::NotificationHub;
use leanloom_core::DbId;
use leanloom_events::EventBus;
use leanloom_pipeline::{GenerationProducer, JobStatusService};
use leanloom_queue::{QueueConfig, QueueTransport};

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        notify_ws_path: "/ws/notifications".to_string(),
    }
}

/// Assemble application state the way `main.rs` does, with the given queue
/// transport standing in for the broker link.
pub fn build_test_state(pool: PgPool, queue: QueueTransport) -> AppState {
    let hub = Arc::new(NotificationHub::new());
    let bus = EventBus::new();
    let service = Arc::new(JobStatusService::new(pool.clone(), bus));
    let producer = Arc::new(GenerationProducer::new(Arc::clone(&service), queue));

    AppState {
        pool,
        hub,
        service,
        producer,
    }
}

/// Build the full application router with all middleware layers.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub fn build_app(state: AppState) -> Router {
    let config = test_config();

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:3000".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::app_routes(&config.notify_ws_path))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

/// Router over a transport that was never connected; publishes fail fast.
pub fn build_test_app(pool: PgPool) -> Router {
    build_app(build_test_state(pool, disconnected_queue()))
}

/// A queue transport with no broker behind it.
pub fn disconnected_queue() -> QueueTransport {
    QueueTransport::new(QueueConfig::new("ws://127.0.0.1:1", "documents"))
}

/// A queue transport connected to a loopback broker that accepts and drains
/// every frame, so producer publishes succeed.
pub async fn connected_queue() -> QueueTransport {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let transport = QueueTransport::new(QueueConfig::new(format!("ws://{addr}"), "documents"));
    transport.connect();
    for _ in 0..200 {
        if transport.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(transport.is_connected(), "loopback broker never came up");
    transport
}

/// Insert a user and an idea to satisfy the job foreign keys.
pub async fn seed_refs(pool: &PgPool) -> (DbId, DbId) {
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

/// Issue a GET request against the app.
pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Issue a POST request with a JSON body against the app.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Collect and parse a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
