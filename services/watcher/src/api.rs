//! HTTP surface for event-triggered runs.
//!
//! An external scheduler or orchestrator calls `POST /v1/run`; the response
//! body is `Success!` or the error text of the failed run.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::runner::{RunError, Runner};

/// Body returned for a successful run.
pub const SUCCESS_BODY: &str = "Success!";

/// Shared state for request handlers.
#[derive(Clone)]
pub struct ApiState {
    inner: Arc<ApiStateInner>,
}

struct ApiStateInner {
    runner: Runner,
    // Overlapping invocations against this process run one after another.
    run_gate: Mutex<()>,
}

impl ApiState {
    pub fn new(runner: Runner) -> Self {
        Self {
            inner: Arc::new(ApiStateInner {
                runner,
                run_gate: Mutex::new(()),
            }),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

/// Create the router with all routes and middleware.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/run", post(trigger_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "patchwatch".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn trigger_run(State(state): State<ApiState>) -> impl IntoResponse {
    let _gate = state.inner.run_gate.lock().await;

    match state.inner.runner.run_once().await {
        Ok(_) => (StatusCode::OK, SUCCESS_BODY.to_string()),
        Err(e @ RunError::DeadlineExceeded(_)) => (StatusCode::GATEWAY_TIMEOUT, e.to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
