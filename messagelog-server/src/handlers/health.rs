//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded"
    #[schema(example = "healthy")]
    pub status: &'static str,
    /// Server version from Cargo.toml
    #[schema(example = "0.1.0")]
    pub version: &'static str,
    /// Whether new messages are refused because timestamping keeps failing
    #[schema(example = false)]
    pub timestamping_halted: bool,
    /// Service name
    #[schema(example = "messagelog-server")]
    pub service: &'static str,
}

/// Health check endpoint
///
/// Returns JSON with service status and version. The service is reported as
/// "degraded" while the timestamping circuit breaker refuses new messages.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let halted = state
        .manager
        .status()
        .await
        .map(|status| status.breaker.halted)
        .unwrap_or(false);

    Json(HealthResponse {
        status: if halted { "degraded" } else { "healthy" },
        version: env!("CARGO_PKG_VERSION"),
        timestamping_halted: halted,
        service: "messagelog-server",
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    /// Record store backend in use
    #[schema(example = "postgres")]
    pub store: &'static str,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Kubernetes readiness check
///
/// Returns 200 once the record store answers, 503 otherwise.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ReadyResponse),
        (status = 503, description = "Record store unavailable", body = ReadyResponse)
    )
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    match state.manager.status().await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                store: state.store_backend,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                store: state.store_backend,
                message: Some(e.to_string()),
            }),
        ),
    }
}
