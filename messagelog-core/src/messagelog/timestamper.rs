//! Batch timestamping against the configured TSAs.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::store::Task;
use crate::error::{LogError, Result};
use crate::hashchain::{HashAlgorithm, HashChainBuilder, HashChainProof};
use crate::record::{NewTimestampRecord, RecordId};
use crate::tsp::{verify_response_token, TimeStampRequest, TimestampingServices, TsaClient};

/// Last known state of one TSA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TsaStatus {
    pub url: String,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Error of the last attempt, cleared by a success.
    pub error: Option<String>,
}

/// Per-URL TSA diagnostics shared between the timestamper and status readers.
#[derive(Debug, Default)]
pub struct TsaStatusRegistry {
    statuses: DashMap<String, TsaStatus>,
}

impl TsaStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, url: &str, error: Option<String>) {
        let now = Utc::now();
        let mut entry = self
            .statuses
            .entry(url.to_string())
            .or_insert_with(|| TsaStatus {
                url: url.to_string(),
                last_attempt: None,
                last_success: None,
                error: None,
            });
        entry.last_attempt = Some(now);
        if error.is_none() {
            entry.last_success = Some(now);
        }
        entry.error = error;
    }

    /// Statuses of every TSA tried so far, ordered by URL.
    pub fn snapshot(&self) -> Vec<TsaStatus> {
        let mut statuses: Vec<TsaStatus> =
            self.statuses.iter().map(|e| e.value().clone()).collect();
        statuses.sort_by(|a, b| a.url.cmp(&b.url));
        statuses
    }
}

/// A verified TSA token together with the proofs it covers.
#[derive(Debug)]
pub struct TimestampSucceeded {
    pub timestamp: NewTimestampRecord,
    /// One proof per task, in chain order.
    pub proofs: Vec<(RecordId, HashChainProof)>,
    pub tsa_url: String,
}

/// Builds one TSA request per batch and tries the configured TSAs in order.
pub struct Timestamper {
    client: Arc<dyn TsaClient>,
    services: Arc<dyn TimestampingServices>,
    statuses: Arc<TsaStatusRegistry>,
}

impl Timestamper {
    pub fn new(
        client: Arc<dyn TsaClient>,
        services: Arc<dyn TimestampingServices>,
        statuses: Arc<TsaStatusRegistry>,
    ) -> Self {
        Self {
            client,
            services,
            statuses,
        }
    }

    /// Timestamp `tasks` as one batch.
    ///
    /// The first TSA returning a token that verifies against the trusted
    /// certificates wins. When every TSA fails, the whole batch fails.
    #[instrument(skip(self, tasks), fields(batch_size = tasks.len()))]
    pub async fn timestamp(
        &self,
        algorithm: HashAlgorithm,
        tasks: &[Task],
    ) -> Result<TimestampSucceeded> {
        let mut builder = HashChainBuilder::new(algorithm);
        for task in tasks {
            builder.add_input_hash(task.signature_hash.clone())?;
        }
        let chain = builder.finish_building()?;

        let urls = self.services.urls();
        if urls.is_empty() {
            return Err(LogError::TimestampFailed(
                "no timestamping services configured".to_string(),
            ));
        }
        let trusted = self.services.trusted_certificates();
        let request = TimeStampRequest::new(algorithm, chain.result.clone());
        let request_der = request.to_der();

        let mut last_error = None;
        for url in &urls {
            let start = Instant::now();
            let outcome = match self.client.request(url, &request_der).await {
                Ok(token) => {
                    verify_response_token(&token, &request, &trusted).map(|info| (token, info))
                }
                Err(e) => Err(e),
            };
            let latency_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok((token, info)) => {
                    self.statuses.record(url, None);
                    info!(tsa_url = %url, latency_ms, gen_time = %info.gen_time, "Batch timestamped");
                    let proofs = tasks
                        .iter()
                        .map(|t| t.record_id)
                        .zip(chain.proofs)
                        .collect();
                    return Ok(TimestampSucceeded {
                        timestamp: NewTimestampRecord {
                            time: info.gen_time,
                            timestamp: token,
                            hash_chain_result: chain.result,
                            algorithm,
                        },
                        proofs,
                        tsa_url: url.clone(),
                    });
                }
                Err(e) => {
                    warn!(tsa_url = %url, latency_ms, error = %e, "TSA request failed");
                    self.statuses.record(url, Some(e.to_string()));
                    last_error = Some(e);
                }
            }
        }

        debug!(tried = urls.len(), "All TSAs failed");
        Err(LogError::TimestampFailed(format!(
            "all {} timestamping services failed, last error: {}",
            urls.len(),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
