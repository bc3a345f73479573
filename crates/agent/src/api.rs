//! HTTP API for health checks, Prometheus metrics and readiness inspection

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use probe_lib::{ProbeMetrics, ReadinessManager};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub readiness: Arc<dyn ReadinessManager>,
}

impl AppState {
    pub fn new(readiness: Arc<dyn ReadinessManager>) -> Self {
        // Register the prober metrics so they are exported before the first probe
        ProbeMetrics::new();
        Self { readiness }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    namespace: String,
    pod: String,
    containers: HashMap<String, bool>,
}

/// Liveness of the agent process itself
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Recorded container readiness of one pod, 404 if nothing was recorded
async fn pod_readiness(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod)): Path<(String, String)>,
) -> Response {
    match state.readiness.pod_containers_readiness(&namespace, &pod).await {
        Some(containers) => Json(ReadinessResponse {
            namespace,
            pod,
            containers,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("no readiness recorded for {namespace}/{pod}"),
        )
            .into_response(),
    }
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/pods/:namespace/:pod/readiness", get(pod_readiness))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
