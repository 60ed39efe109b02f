use crate::consumer::{MessageSource, PipelineState, ShutdownController};
use crate::services::get_metrics;
use crate::services::processor::EventProcessor;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Map};
use std::sync::Arc;

/// What `/ready` inspects.
#[derive(Clone)]
pub struct ReadinessState {
    pub shutdown: ShutdownController,
    pub source: Arc<dyn MessageSource>,
    pub processor: Arc<EventProcessor>,
}

/// Liveness probe. Does not touch any dependency.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "notification-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: pipeline running, every backing store reachable and the
/// channel provider usable.
pub async fn readiness_check(State(state): State<ReadinessState>) -> impl IntoResponse {
    let mut checks = Map::new();
    let mut ready = true;

    let pipeline = state.shutdown.state();
    if pipeline != PipelineState::Running {
        ready = false;
    }
    checks.insert("pipeline".to_string(), json!(pipeline.to_string()));

    let broker = match state.source.health_check().await {
        Ok(()) => json!("ok"),
        Err(e) => {
            ready = false;
            json!(e.to_string())
        }
    };
    checks.insert("broker".to_string(), broker);

    for (name, result) in state.processor.health_check().await {
        let value = match result {
            Ok(()) => json!("ok"),
            Err(e) => {
                ready = false;
                json!(e)
            }
        };
        checks.insert(name.to_string(), value);
    }

    if ready {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        tracing::warn!(checks = %serde_json::Value::Object(checks.clone()), "Readiness check failed");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "checks": checks })),
        )
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
