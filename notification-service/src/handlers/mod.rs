//! HTTP handlers for notification-service.
//!
//! The service has no business API; HTTP only serves infrastructure probes.

pub mod health;

pub use health::{health_check, metrics_endpoint, readiness_check, ReadinessState};

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub fn router(state: ReadinessState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
