//! HTTP surface: Prometheus scrape, health, and JSON debug views.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::SnapshotCache;
use crate::error::Result;

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub cache: Arc<SnapshotCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/debug/gpuinfo", get(gpu_info_handler))
        .route("/debug/gpustat", get(gpu_stat_handler))
        .route("/debug/process", get(process_handler))
        .with_state(state)
}

/// Serve until `cancel` fires, then drain in-flight requests.
pub async fn serve(listener: TcpListener, app: Router, cancel: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("serving metrics on http://{addr}/metrics");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn gpu_info_handler(State(state): State<AppState>) -> Response {
    Json(state.cache.devices().to_vec()).into_response()
}

async fn gpu_stat_handler(State(state): State<AppState>) -> Response {
    Json(state.cache.gpu_stats()).into_response()
}

async fn process_handler(State(state): State<AppState>) -> Response {
    Json(state.cache.process_stats()).into_response()
}
