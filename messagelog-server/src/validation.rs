//! Request validation module
//!
//! Checks and decodes the fields of incoming log requests.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::ApiError;

/// Maximum length of a query id in bytes
pub const MAX_QUERY_ID_LEN: usize = 255;

/// Default max decoded message size in bytes (16 MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Validates a query id: non-blank and at most [`MAX_QUERY_ID_LEN`] bytes.
pub fn validate_query_id(query_id: &str) -> Result<(), ApiError> {
    if query_id.trim().is_empty() {
        return Err(ApiError::bad_request("query_id must not be empty"));
    }
    if query_id.len() > MAX_QUERY_ID_LEN {
        return Err(ApiError::bad_request(format!(
            "query_id too long: {} bytes exceeds maximum of {} bytes",
            query_id.len(),
            MAX_QUERY_ID_LEN
        )));
    }
    Ok(())
}

/// Decodes a base64 request field, naming the field in the error.
pub fn decode_base64_field(field: &str, value: &str) -> Result<Vec<u8>, ApiError> {
    BASE64
        .decode(value.trim())
        .map_err(|e| ApiError::bad_request(format!("Invalid base64 in {}: {}", field, e)))
}

/// Validates the size of a decoded message
pub fn validate_message_size(size: usize, max_size: usize) -> Result<(), ApiError> {
    if size > max_size {
        Err(ApiError::bad_request(format!(
            "Message too large: {} bytes exceeds maximum of {} bytes",
            size, max_size
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_query_id() {
        assert!(validate_query_id("q-2026-10-18-0001").is_ok());
        assert!(validate_query_id("").is_err());
        assert!(validate_query_id("   ").is_err());
        assert!(validate_query_id(&"x".repeat(MAX_QUERY_ID_LEN)).is_ok());
        assert!(validate_query_id(&"x".repeat(MAX_QUERY_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_decode_base64_field() {
        assert_eq!(decode_base64_field("signature", "c2ln").unwrap(), b"sig");
        assert_eq!(decode_base64_field("signature", "").unwrap(), b"");

        let err = decode_base64_field("signature", "!!!").unwrap_err();
        assert!(err.to_string().contains("signature"));
    }

    #[test]
    fn test_validate_message_size() {
        assert!(validate_message_size(1024, 2048).is_ok());
        assert!(validate_message_size(2048, 2048).is_ok());
        assert!(validate_message_size(2049, 2048).is_err());
    }
}
