//! Record lookup and forced timestamping handlers
//!
//! Handles GET /records and POST /records/{id}/timestamp.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use messagelog_core::{HashChainProof, TimestampProof, TimestampRecord};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::messages::MessageRecordResponse;
use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::validate_query_id;

/// Query parameters for record lookup
#[derive(Debug, Deserialize, IntoParams)]
pub struct FindRecordQuery {
    /// Query id to look up
    pub query_id: String,
    /// Earliest log time, inclusive (default: Unix epoch)
    pub from: Option<DateTime<Utc>>,
    /// Latest log time, inclusive (default: now)
    pub to: Option<DateTime<Utc>>,
}

/// A timestamp record covering one batch
#[derive(Serialize, ToSchema)]
pub struct TimestampRecordResponse {
    #[schema(example = 1)]
    pub id: i64,
    /// Time asserted by the TSA
    pub time: DateTime<Utc>,
    /// DER-encoded RFC 3161 TimeStampToken, base64-encoded
    pub token: String,
    /// Hash chain result the token covers, hex-encoded
    pub hash_chain_result: String,
    #[schema(example = "SHA-256")]
    pub algorithm: String,
}

impl From<TimestampRecord> for TimestampRecordResponse {
    fn from(record: TimestampRecord) -> Self {
        Self {
            id: record.id,
            time: record.time,
            token: BASE64.encode(&record.timestamp),
            hash_chain_result: hex::encode(&record.hash_chain_result),
            algorithm: record.algorithm.name().to_string(),
        }
    }
}

/// Hash chain membership proof of one record
#[derive(Serialize, ToSchema)]
pub struct HashChainProofResponse {
    #[schema(example = "SHA-256")]
    pub algorithm: String,
    /// Position of the record in its batch
    pub index: usize,
    /// Chain state before the record, hex-encoded
    pub prefix: Option<String>,
    /// The record's signature hash, hex-encoded
    pub leaf: String,
    /// Later leaves of the batch, hex-encoded
    pub suffix: Vec<String>,
}

impl From<HashChainProof> for HashChainProofResponse {
    fn from(proof: HashChainProof) -> Self {
        Self {
            algorithm: proof.algorithm.name().to_string(),
            index: proof.index,
            prefix: proof.prefix.map(hex::encode),
            leaf: hex::encode(&proof.leaf),
            suffix: proof.suffix.iter().map(hex::encode).collect(),
        }
    }
}

/// A record together with its timestamp, if any
#[derive(Serialize, ToSchema)]
pub struct LogRecordResponse {
    pub record: MessageRecordResponse,
    pub timestamp: Option<TimestampRecordResponse>,
    pub hash_chain: Option<HashChainProofResponse>,
}

/// Proof that a record was timestamped
#[derive(Serialize, ToSchema)]
pub struct TimestampProofResponse {
    pub record_id: i64,
    pub timestamp: TimestampRecordResponse,
    pub hash_chain: HashChainProofResponse,
}

impl From<TimestampProof> for TimestampProofResponse {
    fn from(proof: TimestampProof) -> Self {
        Self {
            record_id: proof.record_id,
            timestamp: proof.timestamp_record.into(),
            hash_chain: proof.hash_chain.into(),
        }
    }
}

/// Find a record by query id
///
/// Returns the earliest record with the given query id logged within
/// `[from, to]`, with its timestamp when it has one.
#[utoipa::path(
    get,
    path = "/records",
    tag = "Records",
    params(FindRecordQuery),
    responses(
        (status = 200, description = "Matching record", body = LogRecordResponse),
        (status = 400, description = "Invalid query"),
        (status = 404, description = "No record in the time range")
    )
)]
pub async fn find_record_handler(
    State(state): State<AppState>,
    Query(query): Query<FindRecordQuery>,
) -> Result<Json<LogRecordResponse>, ApiError> {
    validate_query_id(&query.query_id)?;
    let from = query.from.unwrap_or_default();
    let to = query.to.unwrap_or_else(Utc::now);
    if from > to {
        return Err(ApiError::bad_request("from must not be after to"));
    }

    let found = state
        .manager
        .find_by_query_id(&query.query_id, from, to)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("No record for query id '{}'", query.query_id))
        })?;

    let mut message = found.message;
    let hash_chain = message.hash_chain.take().map(Into::into);
    Ok(Json(LogRecordResponse {
        record: message.into(),
        timestamp: found.timestamp.map(Into::into),
        hash_chain,
    }))
}

/// Timestamp one record now
///
/// Sends the record to the TSA on its own unless it already has a timestamp,
/// in which case the existing proof is returned.
#[utoipa::path(
    post,
    path = "/records/{id}/timestamp",
    tag = "Records",
    params(
        ("id" = i64, Path, description = "Message record id")
    ),
    responses(
        (status = 200, description = "Timestamp proof", body = TimestampProofResponse),
        (status = 404, description = "Record not found"),
        (status = 502, description = "Timestamping failed")
    )
)]
pub async fn timestamp_record_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TimestampProofResponse>, ApiError> {
    let proof = state.manager.timestamp(id).await?;
    Ok(Json(proof.into()))
}
