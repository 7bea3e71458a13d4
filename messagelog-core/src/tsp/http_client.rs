//! RFC 3161 over HTTP with retry and backoff.

use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoff};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::rfc3161::TimeStampResponse;
use super::TsaClient;
use crate::error::{LogError, Result};

const TIMESTAMP_QUERY: &str = "application/timestamp-query";
const TIMESTAMP_REPLY: &str = "application/timestamp-reply";

/// Configuration for the TSA HTTP client.
#[derive(Debug, Clone)]
pub struct TsaHttpConfig {
    /// Connect + read timeout of a single request.
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for TsaHttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: 2,
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(2),
        }
    }
}

/// Sends time-stamp requests to TSAs over HTTP(S).
pub struct HttpTsaClient {
    client: Client,
    config: TsaHttpConfig,
}

impl HttpTsaClient {
    pub fn new(config: TsaHttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| LogError::TimestampFailed(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn request_once(
        &self,
        url: &str,
        request_der: &[u8],
    ) -> std::result::Result<Vec<u8>, backoff::Error<LogError>> {
        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, TIMESTAMP_QUERY)
            .header(ACCEPT, TIMESTAMP_REPLY)
            .body(request_der.to_vec())
            .send()
            .await
            .map_err(|e| {
                let latency_ms = start.elapsed().as_millis() as u64;
                if is_transient_error(&e) {
                    warn!(tsa_url = url, error = %e, latency_ms, "Transient TSA error, will retry");
                    backoff::Error::transient(LogError::TimestampFailed(format!(
                        "{url}: {e}"
                    )))
                } else {
                    warn!(tsa_url = url, error = %e, latency_ms, "TSA request failed");
                    backoff::Error::permanent(LogError::TimestampFailed(format!("{url}: {e}")))
                }
            })?;

        let status = response.status();
        debug!(tsa_url = url, status = %status, "Received TSA response");

        if !status.is_success() {
            let latency_ms = start.elapsed().as_millis() as u64;
            let err = LogError::TimestampFailed(format!("{url} returned status {status}"));
            return if is_transient_status(status) {
                warn!(tsa_url = url, status = %status, latency_ms, "Transient HTTP status, will retry");
                Err(backoff::Error::transient(err))
            } else {
                warn!(tsa_url = url, status = %status, latency_ms, "Permanent HTTP error");
                Err(backoff::Error::permanent(err))
            };
        }

        let body = response.bytes().await.map_err(|e| {
            backoff::Error::permanent(LogError::TimestampFailed(format!(
                "{url}: failed to read response: {e}"
            )))
        })?;

        debug!(
            tsa_url = url,
            latency_ms = start.elapsed().as_millis() as u64,
            response_bytes = body.len(),
            "TSA request completed"
        );

        TimeStampResponse::from_der(&body)
            .and_then(TimeStampResponse::into_token)
            .map_err(backoff::Error::permanent)
    }

    fn build_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            max_elapsed_time: Some(self.config.timeout * self.config.max_retries),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TsaClient for HttpTsaClient {
    async fn request(&self, url: &str, request_der: &[u8]) -> Result<Vec<u8>> {
        retry_notify(
            self.build_backoff(),
            || async move { self.request_once(url, request_der).await },
            |err: LogError, duration: Duration| {
                warn!(
                    tsa_url = url,
                    error = %err,
                    retry_after_ms = duration.as_millis() as u64,
                    "Retry scheduled"
                );
            },
        )
        .await
    }
}

/// Check if a reqwest error is transient and should be retried.
pub fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Check if an HTTP status code indicates a transient error.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_codes() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_unreachable_tsa_is_timestamp_failure() {
        let client = HttpTsaClient::new(TsaHttpConfig {
            timeout: Duration::from_millis(500),
            max_retries: 0,
            ..Default::default()
        })
        .unwrap();

        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let err = client
            .request("http://127.0.0.1:9/tsa", b"\x30\x00")
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::TimestampFailed(_)));
    }
}
