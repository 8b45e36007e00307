//! Health & metrics API endpoints
//!
//! - GET /health  - status, uptime and enabled relay directions (JSON)
//! - GET /readyz  - OK once every relay has connected and started
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics;

/// State shared between the relays and the HTTP server
#[derive(Debug)]
pub struct ApiState {
    started_at: DateTime<Utc>,
    directions: Vec<&'static str>,
    ready: AtomicBool,
}

impl ApiState {
    pub fn new(directions: Vec<&'static str>) -> Self {
        Self {
            started_at: Utc::now(),
            directions,
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        metrics::UP.set(if ready { 1.0 } else { 0.0 });
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

pub type SharedApiState = Arc<ApiState>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub started_at: String,
    pub uptime_seconds: i64,
    pub directions: Vec<&'static str>,
}

async fn health(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_ready() { "healthy" } else { "starting" },
        started_at: state.started_at.to_rfc3339(),
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        directions: state.directions.clone(),
    })
}

async fn readiness(State(state): State<SharedApiState>) -> Response {
    if state.is_ready() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY").into_response()
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Serve the API until `cancel` fires
pub async fn start_api_server(
    addr: SocketAddr,
    state: SharedApiState,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_follows_state() {
        let state = Arc::new(ApiState::new(vec!["beacon"]));
        let response = readiness(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.set_ready(true);
        let response = readiness(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_directions() {
        let state = Arc::new(ApiState::new(vec!["beacon", "parachain"]));
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "starting");
        assert_eq!(body.directions, vec!["beacon", "parachain"]);
        assert!(body.uptime_seconds >= 0);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_encodes_registry() {
        metrics::record_retry("api_test");
        let response = prometheus_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
