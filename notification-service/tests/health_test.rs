mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{fast_settings, Harness, InMemorySource};
use notification_service::consumer::ShutdownController;
use notification_service::handlers::{router, ReadinessState};
use notification_service::services::MockDispatcher;
use std::sync::Arc;
use tower::util::ServiceExt;

struct TestApp {
    router: Router,
    harness: Harness,
    source: Arc<InMemorySource>,
    shutdown: ShutdownController,
}

fn test_app() -> TestApp {
    let harness = Harness::new(MockDispatcher::new(), fast_settings(5));
    let source = Arc::new(InMemorySource::new());
    let shutdown = ShutdownController::new();
    let router = router(ReadinessState {
        shutdown: shutdown.clone(),
        source: source.clone(),
        processor: harness.processor.clone(),
    });
    TestApp {
        router,
        harness,
        source,
        shutdown,
    }
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

#[tokio::test]
async fn health_check_works() {
    let app = test_app();

    let (status, body) = get(app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "notification-service");
}

#[tokio::test]
async fn ready_when_running_and_dependencies_healthy() {
    let app = test_app();

    let (status, body) = get(app.router, "/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn not_ready_when_broker_unreachable() {
    let app = test_app();
    app.source.set_healthy(false);

    let (status, body) = get(app.router, "/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["dedup"], "ok");
    assert_ne!(body["checks"]["broker"], "ok");
}

#[tokio::test]
async fn not_ready_when_dead_letter_sink_down() {
    let app = test_app();
    app.harness.sink.set_available(false);

    let (status, body) = get(app.router, "/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_ne!(body["checks"]["dead_letter"], "ok");
}

#[tokio::test]
async fn not_ready_when_channel_provider_unusable() {
    let app = test_app();
    app.harness.dispatcher.set_healthy(false);

    let (status, body) = get(app.router, "/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_ne!(body["checks"]["dispatcher"], "ok");
    assert_eq!(body["checks"]["ledger"], "ok");
}

#[tokio::test]
async fn not_ready_while_draining() {
    let app = test_app();
    app.shutdown.begin_drain();

    let (status, body) = get(app.router, "/ready").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["checks"]["pipeline"], "draining");
}

#[tokio::test]
async fn metrics_endpoint_responds() {
    let app = test_app();

    let response = app
        .router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
