//! Persistence seam of the message log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::hashchain::HashChainProof;
use crate::record::{
    DigestEntry, LogRecord, MessageRecord, NewMessageRecord, NewTimestampRecord, RecordId,
    TimestampRecord,
};

/// A record that still needs a timestamp.
///
/// Tasks are derived from records without a timestamp record, so they survive
/// restarts without a separate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub record_id: RecordId,
    pub signature_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Durable storage of message records, timestamp records and the archive chain tip.
///
/// Every mutating call runs in one transaction: it is applied completely or not
/// at all. Implementations must be safe for concurrent callers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record and return it with its assigned id.
    async fn save(&self, record: NewMessageRecord) -> Result<MessageRecord>;

    async fn get(&self, id: RecordId) -> Result<Option<MessageRecord>>;

    /// Earliest record with `query_id` whose time lies in `[from, to]`.
    async fn find_by_query_id(
        &self,
        query_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<LogRecord>>;

    async fn get_timestamp(&self, id: RecordId) -> Result<Option<TimestampRecord>>;

    /// Up to `limit` untimestamped records, oldest first.
    async fn pending_tasks(&self, limit: usize) -> Result<Vec<Task>>;

    async fn count_pending_tasks(&self) -> Result<u64>;

    /// Store a timestamp record and link every record in `proofs` to it.
    ///
    /// Fails without changes if any record is missing or already timestamped.
    async fn attach_timestamp(
        &self,
        timestamp: NewTimestampRecord,
        proofs: Vec<(RecordId, HashChainProof)>,
    ) -> Result<TimestampRecord>;

    /// Up to `limit` timestamped, unarchived records, ordered by time.
    async fn archivable_records(&self, limit: usize) -> Result<Vec<MessageRecord>>;

    async fn load_digest_entry(&self) -> Result<Option<DigestEntry>>;

    /// Mark records archived and replace the chain tip.
    async fn mark_archived(&self, ids: &[RecordId], digest: DigestEntry) -> Result<()>;

    /// Delete archived records older than `cutoff`, returning how many were removed.
    async fn delete_archived_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
