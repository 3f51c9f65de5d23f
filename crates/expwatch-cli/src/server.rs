//! HTTP server for the query, health and metrics endpoints.

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use expwatch_core::health::HealthStatus;
use expwatch_core::{Error, Tracker};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub tracker: Arc<Tracker>,
}

/// Error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Build the router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/expiring", get(expiring_handler))
        .route("/state", get(state_handler))
        .route("/tick", post(tick_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve until the listener fails or shutdown is signalled. Fails if the
/// port cannot be bound.
pub async fn start_server(
    state: Arc<ServerState>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;

    info!(port, "HTTP server started");

    tokio::select! {
        result = axum::serve(listener, router(state)) => {
            result.context("HTTP server error")?;
        }
        _ = shutdown_rx.recv() => {
            info!("HTTP server shutting down");
        }
    }
    Ok(())
}

/// Records whose grace period ends soon. Never fails; store errors yield an
/// empty view.
async fn expiring_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.tracker.query().await)
}

/// Persisted state, manifest and lease.
async fn state_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.tracker.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// Run one invocation on demand.
async fn tick_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.tracker.invoke().await {
        Ok(report) => Json(report).into_response(),
        Err(e @ Error::Lease(_)) => error_response(StatusCode::CONFLICT, &e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

fn error_response(status: StatusCode, error: &Error) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let report = state.tracker.health().report();
    let status_code = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}

/// Liveness probe: the process is serving.
async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe handler.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.tracker.health().is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.tracker.metrics().encode() {
        Ok(output) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            output,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}
