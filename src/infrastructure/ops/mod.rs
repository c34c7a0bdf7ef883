//! Operational HTTP Endpoint
//!
//! Health check and Prometheus metrics, served on a fixed port next to the
//! data plane.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns `200 OK`
//! - `GET /metrics` - Prometheus metrics in text format

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics::get_metrics_handle;

/// Listen address for the operational endpoint.
pub const OPS_ADDR: &str = "0.0.0.0:9090";

/// Operational server errors.
#[derive(Debug, thiserror::Error)]
pub enum OpsServerError {
    /// HTTP server failed while running.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// Serve the operational endpoint until cancelled.
///
/// # Errors
///
/// Returns `OpsServerError` if the HTTP server encounters a fatal error
/// while running.
pub async fn serve(listener: TcpListener, cancel: CancellationToken) -> Result<(), OpsServerError> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "operational server listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| OpsServerError::ServerFailed(e.to_string()))?;

    tracing::info!("operational server stopped");
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}
