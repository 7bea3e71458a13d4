//! Message log status handlers
//!
//! Handles GET /status and POST /timestamping/reset.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use messagelog_core::messagelog::{LogStatus, TsaStatus};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::state::AppState;

/// Diagnostics of one timestamping service
#[derive(Serialize, ToSchema)]
pub struct TsaStatusResponse {
    #[schema(example = "http://tsa.example/tsr")]
    pub url: String,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Error of the last attempt, absent after a success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TsaStatus> for TsaStatusResponse {
    fn from(status: TsaStatus) -> Self {
        Self {
            url: status.url,
            last_attempt: status.last_attempt,
            last_success: status.last_success,
            error: status.error,
        }
    }
}

/// Message log status
#[derive(Serialize, ToSchema)]
pub struct StatusResponse {
    /// Whether every message is timestamped before `POST /messages` returns
    pub timestamp_immediately: bool,
    /// Whether new messages are refused
    pub halted: bool,
    /// Start of the current run of timestamping failures
    pub first_failure: Option<DateTime<Utc>>,
    pub halted_at: Option<DateTime<Utc>>,
    /// Records still waiting for a timestamp
    #[schema(example = 0)]
    pub pending_tasks: u64,
    /// Whether a TSA request is currently running
    pub batch_in_flight: bool,
    /// File name of the newest archive
    pub last_archive: Option<String>,
    pub services: Vec<TsaStatusResponse>,
}

impl StatusResponse {
    fn new(status: LogStatus, services: Vec<TsaStatus>) -> Self {
        Self {
            timestamp_immediately: status.timestamp_immediately,
            halted: status.breaker.halted,
            first_failure: status.breaker.first_failure,
            halted_at: status.breaker.halted_at,
            pending_tasks: status.pending_tasks,
            batch_in_flight: status.batch_in_flight,
            last_archive: status.last_archive,
            services: services.into_iter().map(Into::into).collect(),
        }
    }
}

async fn current_status(state: &AppState) -> Result<StatusResponse, ApiError> {
    let status = state.manager.status().await?;
    Ok(StatusResponse::new(
        status,
        state.manager.timestamping_status(),
    ))
}

/// Current state of the message log
///
/// Reports the circuit breaker, the pending task count, the newest archive and
/// per-TSA diagnostics.
#[utoipa::path(
    get,
    path = "/status",
    tag = "Timestamping",
    responses(
        (status = 200, description = "Message log status", body = StatusResponse),
        (status = 500, description = "Record store failure")
    )
)]
pub async fn status_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    Ok(Json(current_status(&state).await?))
}

/// Clear a timestamping halt
///
/// Resets the failure window so new messages are accepted again. Used with the
/// manual halt policy after the TSA problem has been fixed.
#[utoipa::path(
    post,
    path = "/timestamping/reset",
    tag = "Timestamping",
    responses(
        (status = 200, description = "Halt cleared", body = StatusResponse),
        (status = 500, description = "Record store failure")
    )
)]
pub async fn reset_halt_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.manager.reset_halt();
    Ok(Json(current_status(&state).await?))
}
