//! HTTP surface
//!
//! - `GET /health`: 200 when the store connection is ready, 503 otherwise
//! - `GET /metrics`: always 200 with the exposition body

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::collector::Collector;
use crate::store::QueueStore;

/// Exposition format content type
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub fn build_router<S: QueueStore>(collector: Arc<Collector<S>>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route("/metrics", get(metrics::<S>))
        .with_state(collector)
        .layer(TraceLayer::new_for_http())
}

async fn health<S: QueueStore>(State(collector): State<Arc<Collector<S>>>) -> StatusCode {
    if collector.state().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics<S: QueueStore>(State(collector): State<Arc<Collector<S>>>) -> impl IntoResponse {
    let body = collector.scrape().await;
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        body,
    )
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
