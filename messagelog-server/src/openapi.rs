//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document of the message log operator API.

use utoipa::OpenApi;

use crate::handlers::{
    ArchiveJobResponse, CleanJobResponse, HashChainProofResponse, HealthResponse,
    LogMessageRequest, LogRecordResponse, MessageRecordResponse, ReadyResponse, StatusResponse,
    TimestampJobResponse, TimestampProofResponse, TimestampRecordResponse, TsaStatusResponse,
};

/// Message Log API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Message Log API",
        version = "0.1.0",
        description = r#"
## Tamper-evident logging of signed messages

Every logged message is stored with its signature and bound to trusted time:

- **Hash chains** - each batch of records is linked into one chain whose result is timestamped
- **RFC 3161 timestamps** - batches are sent to a Time-Stamping Authority, with fallback across TSAs
- **Chained archives** - aged records move into zip archives, each seeded with the previous archive's digest

### How It Works

1. **Log** a signed message via `POST /messages`
2. Pending records are timestamped in batches, or immediately when configured
3. **Look up** a record and its proof via `GET /records`
4. Archives can be verified offline with the `messagelog` CLI

When timestamping keeps failing for longer than the configured period, new
messages are refused until the TSA recovers or `POST /timestamping/reset` is called.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Messages", description = "Log signed messages"),
        (name = "Records", description = "Look up records and their timestamp proofs"),
        (name = "Jobs", description = "Run timestamping, archiving and cleaning on demand"),
        (name = "Timestamping", description = "Timestamping status and circuit breaker"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::status::status_handler,
        crate::handlers::status::reset_halt_handler,
        crate::handlers::messages::log_message_handler,
        crate::handlers::records::find_record_handler,
        crate::handlers::records::timestamp_record_handler,
        crate::handlers::jobs::timestamp_job_handler,
        crate::handlers::jobs::archive_job_handler,
        crate::handlers::jobs::clean_job_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            StatusResponse,
            TsaStatusResponse,
            LogMessageRequest,
            MessageRecordResponse,
            LogRecordResponse,
            TimestampRecordResponse,
            HashChainProofResponse,
            TimestampProofResponse,
            TimestampJobResponse,
            ArchiveJobResponse,
            CleanJobResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_operator_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/ready",
            "/status",
            "/messages",
            "/records",
            "/records/{id}/timestamp",
            "/jobs/timestamp",
            "/jobs/archive",
            "/jobs/clean",
            "/timestamping/reset",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
