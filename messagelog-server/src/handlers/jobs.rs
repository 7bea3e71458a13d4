//! Maintenance job handlers
//!
//! Run timestamping, archiving or cleaning now instead of waiting for the
//! next scheduled run. Each request returns once the job has finished.

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct TimestampJobResponse {
    /// Records timestamped by this run
    #[schema(example = 3)]
    pub timestamped: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ArchiveJobResponse {
    /// Archive files written, oldest first
    pub archives: Vec<String>,
    /// Records moved into archives
    #[schema(example = 3)]
    pub records: usize,
    /// Set when the archive transfer command failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_error: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CleanJobResponse {
    /// Archived records deleted after their retention period
    #[schema(example = 3)]
    pub deleted: u64,
}

/// Timestamp all pending records
#[utoipa::path(
    post,
    path = "/jobs/timestamp",
    tag = "Jobs",
    responses(
        (status = 200, description = "Timestamping finished", body = TimestampJobResponse),
        (status = 502, description = "Timestamping failed")
    )
)]
pub async fn timestamp_job_handler(
    State(state): State<AppState>,
) -> Result<Json<TimestampJobResponse>, ApiError> {
    let timestamped = state.manager.start_timestamping().await?;
    Ok(Json(TimestampJobResponse { timestamped }))
}

/// Archive timestamped records
#[utoipa::path(
    post,
    path = "/jobs/archive",
    tag = "Jobs",
    responses(
        (status = 200, description = "Archiving finished", body = ArchiveJobResponse),
        (status = 500, description = "Archiving failed")
    )
)]
pub async fn archive_job_handler(
    State(state): State<AppState>,
) -> Result<Json<ArchiveJobResponse>, ApiError> {
    let summary = state.manager.start_archiving().await?;
    Ok(Json(ArchiveJobResponse {
        archives: summary.archives,
        records: summary.records,
        transfer_error: summary.transfer_error,
    }))
}

/// Delete archived records past retention
#[utoipa::path(
    post,
    path = "/jobs/clean",
    tag = "Jobs",
    responses(
        (status = 200, description = "Cleaning finished", body = CleanJobResponse),
        (status = 500, description = "Record store failure")
    )
)]
pub async fn clean_job_handler(
    State(state): State<AppState>,
) -> Result<Json<CleanJobResponse>, ApiError> {
    let deleted = state.manager.start_cleaning().await?;
    Ok(Json(CleanJobResponse { deleted }))
}
