//! API error handling module
//!
//! Provides a unified error type for all API endpoints with structured error variants.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use messagelog_core::LogError;
use thiserror::Error;

/// API error type with structured variants for different error categories
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request - client provided invalid input
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Not found - requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error - unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Message log error - error from the logging engine
    #[error("Message log error: {0}")]
    Log(#[from] LogError),
}

impl ApiError {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Log(ref e) => match e {
                LogError::RecordNotFound(_) => StatusCode::NOT_FOUND,

                // Refused until the TSA recovers or an operator resets the halt
                LogError::TimestampingHalted { .. } | LogError::Shutdown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }

                // TSA or network failures
                LogError::TimestampFailed(_) | LogError::InvalidToken(_) => {
                    StatusCode::BAD_GATEWAY
                }

                LogError::StoreFailed(_)
                | LogError::ArchiveFailed(_)
                | LogError::HashChainInvalid(_)
                | LogError::Serialization(_)
                | LogError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Log(ref e) => match e {
                LogError::RecordNotFound(_) => "RECORD_NOT_FOUND",
                LogError::TimestampingHalted { .. } => "TIMESTAMPING_HALTED",
                LogError::Shutdown => "SHUTTING_DOWN",
                LogError::TimestampFailed(_) => "TIMESTAMP_FAILED",
                LogError::InvalidToken(_) => "INVALID_TIMESTAMP_TOKEN",
                LogError::StoreFailed(_) => "STORE_FAILED",
                LogError::ArchiveFailed(_) => "ARCHIVE_FAILED",
                LogError::HashChainInvalid(_) => "HASH_CHAIN_INVALID",
                LogError::Serialization(_) => "SERIALIZATION_ERROR",
                LogError::Io(_) => "IO_ERROR",
            },
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Log(ref e) => match e {
                LogError::RecordNotFound(id) => format!("Message record {} not found", id),
                LogError::TimestampingHalted { since } => format!(
                    "Timestamping halted: TSA unavailable since {}",
                    since.to_rfc3339()
                ),
                LogError::Shutdown => "Message log is shutting down".to_string(),
                // TSA errors name the failing services, which operators need
                LogError::TimestampFailed(_) | LogError::InvalidToken(_) => e.to_string(),
                LogError::StoreFailed(_) => "Record store failure".to_string(),
                LogError::ArchiveFailed(_) => "Archiving failed".to_string(),
                LogError::HashChainInvalid(_) => "Hash chain verification failed".to_string(),
                LogError::Serialization(_) => "Serialization error".to_string(),
                LogError::Io(_) => "I/O error".to_string(),
            },
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        // All error responses include a `code` field for programmatic error handling
        let body = serde_json::json!({
            "error": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_halted_maps_to_service_unavailable() {
        let err = ApiError::from(LogError::TimestampingHalted { since: Utc::now() });
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), "TIMESTAMPING_HALTED");
    }

    #[test]
    fn test_missing_record_maps_to_not_found() {
        let err = ApiError::from(LogError::RecordNotFound(42));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.client_message(), "Message record 42 not found");
    }

    #[test]
    fn test_store_details_are_hidden() {
        let err = ApiError::from(LogError::StoreFailed("password=hunter2".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.client_message().contains("hunter2"));
    }
}
