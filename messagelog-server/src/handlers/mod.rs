//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod health;
pub mod jobs;
pub mod messages;
pub mod records;
pub mod status;

pub use crate::state::AppState;
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use jobs::{
    archive_job_handler, clean_job_handler, timestamp_job_handler, ArchiveJobResponse,
    CleanJobResponse, TimestampJobResponse,
};
pub use messages::{log_message_handler, LogMessageRequest, MessageRecordResponse};
pub use records::{
    find_record_handler, timestamp_record_handler, FindRecordQuery, HashChainProofResponse,
    LogRecordResponse, TimestampProofResponse, TimestampRecordResponse,
};
pub use status::{reset_halt_handler, status_handler, StatusResponse, TsaStatusResponse};
