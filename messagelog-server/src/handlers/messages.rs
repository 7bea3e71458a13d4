//! Message logging handler
//!
//! Handles POST /messages requests to log signed messages.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use messagelog_core::{LogMessage, MessageRecord};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{
    decode_base64_field, validate_message_size, validate_query_id, DEFAULT_MAX_MESSAGE_SIZE,
};

fn default_store_body() -> bool {
    true
}

/// Request to log a signed message
#[derive(Deserialize, ToSchema)]
pub struct LogMessageRequest {
    /// Identifier of the exchange the message belongs to
    #[schema(example = "q-2026-10-18-0001")]
    pub query_id: String,
    /// Message body, base64-encoded
    #[schema(example = "PHNvYXA6RW52ZWxvcGUvPg==")]
    pub message: String,
    /// Signature over the message, base64-encoded
    #[schema(example = "c2lnbmF0dXJl")]
    pub signature: String,
    /// Persist the message body (default: true). The signature is always kept.
    #[serde(default = "default_store_body")]
    pub store_body: bool,
}

/// A logged message record
#[derive(Serialize, ToSchema)]
pub struct MessageRecordResponse {
    #[schema(example = 1)]
    pub id: i64,
    #[schema(example = "q-2026-10-18-0001")]
    pub query_id: String,
    pub time: DateTime<Utc>,
    /// Whether the body was persisted
    pub body_stored: bool,
    /// Message body, base64-encoded (absent when not stored)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Digest of the message body, hex-encoded
    pub message_hash: String,
    /// Digest binding the message hash and signature, hex-encoded
    pub signature_hash: String,
    #[schema(example = "SHA-256")]
    pub algorithm: String,
    pub archived: bool,
    /// Id of the covering timestamp record, once timestamped
    pub timestamp_record_id: Option<i64>,
}

impl From<MessageRecord> for MessageRecordResponse {
    fn from(record: MessageRecord) -> Self {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

        Self {
            id: record.id,
            query_id: record.query_id,
            time: record.time,
            body_stored: record.body_stored,
            message: record
                .body_stored
                .then(|| BASE64.encode(&record.message)),
            message_hash: hex::encode(&record.message_hash),
            signature_hash: hex::encode(&record.signature_hash),
            algorithm: record.algorithm.name().to_string(),
            archived: record.archived,
            timestamp_record_id: record.timestamp_record_id,
        }
    }
}

/// Log a signed message
///
/// Saves the message and queues it for timestamping. Returns once the record
/// is stored; in immediate mode it also waits for the timestamp.
#[utoipa::path(
    post,
    path = "/messages",
    tag = "Messages",
    request_body = LogMessageRequest,
    responses(
        (status = 201, description = "Message logged", body = MessageRecordResponse),
        (status = 400, description = "Invalid request (empty query id, invalid base64, etc.)"),
        (status = 502, description = "Timestamping failed (immediate mode or no TSA configured)"),
        (status = 503, description = "Timestamping halted, messages are refused")
    )
)]
pub async fn log_message_handler(
    State(state): State<AppState>,
    Json(request): Json<LogMessageRequest>,
) -> Result<(StatusCode, Json<MessageRecordResponse>), ApiError> {
    validate_query_id(&request.query_id)?;
    let body = decode_base64_field("message", &request.message)?;
    validate_message_size(body.len(), DEFAULT_MAX_MESSAGE_SIZE)?;
    let signature = decode_base64_field("signature", &request.signature)?;
    if signature.is_empty() {
        return Err(ApiError::bad_request("signature must not be empty"));
    }

    let record = state
        .manager
        .log(
            LogMessage::new(request.query_id, body),
            signature,
            request.store_body,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(record.into())))
}
