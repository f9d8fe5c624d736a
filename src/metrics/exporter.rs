//! HTTP exporter for Prometheus metrics
//!
//! Serves `GET /metrics` in Prometheus text format and `GET /health` as JSON.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::scheduler::error::SchedulerError;

/// Shared exporter state
#[derive(Clone)]
struct ExporterState {
    start_time: Instant,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Create the exporter router
pub fn create_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_check))
        .with_state(ExporterState {
            start_time: Instant::now(),
        })
        .layer(TraceLayer::new_for_http())
}

/// Serve the exporter until `shutdown_signal` resolves
pub async fn serve_metrics(
    addr: SocketAddr,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), SchedulerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SchedulerError::socket("bind metrics exporter", e))?;

    tracing::info!(address = %addr, "Metrics exporter listening");

    axum::serve(listener, create_router())
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| SchedulerError::socket("serve metrics exporter", e))?;

    tracing::info!("Metrics exporter shutdown complete");
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    match super::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_check(State(state): State<ExporterState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
