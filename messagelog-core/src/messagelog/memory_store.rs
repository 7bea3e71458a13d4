//! In-memory record store for tests and development.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::store::{RecordStore, Task};
use crate::error::{LogError, Result};
use crate::hashchain::HashChainProof;
use crate::record::{
    DigestEntry, LogRecord, MessageRecord, NewMessageRecord, NewTimestampRecord, RecordId,
    TimestampRecord,
};

#[derive(Default)]
struct Inner {
    next_record_id: RecordId,
    next_timestamp_id: RecordId,
    records: BTreeMap<RecordId, MessageRecord>,
    timestamps: BTreeMap<RecordId, TimestampRecord>,
    digest: Option<DigestEntry>,
}

/// Record store keeping everything in process memory.
///
/// Every call holds one lock for its whole duration, which makes each call
/// atomic. Writes can be made to fail on demand to exercise error paths.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
    failing: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every mutating call fail with `StoreFailed` until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of message records currently stored.
    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    /// Number of timestamp records ever stored.
    pub async fn timestamp_count(&self) -> usize {
        self.inner.lock().await.timestamps.len()
    }

    /// Snapshot of every stored message record.
    pub async fn records(&self) -> Vec<MessageRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LogError::StoreFailed(
                "memory store is failing writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, record: NewMessageRecord) -> Result<MessageRecord> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        inner.next_record_id += 1;
        let record = record.with_id(inner.next_record_id);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: RecordId) -> Result<Option<MessageRecord>> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }

    async fn find_by_query_id(
        &self,
        query_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<LogRecord>> {
        let inner = self.inner.lock().await;
        let found = inner
            .records
            .values()
            .filter(|r| r.query_id == query_id && r.time >= from && r.time <= to)
            .min_by_key(|r| (r.time, r.id))
            .cloned();
        Ok(found.map(|message| {
            let timestamp = message
                .timestamp_record_id
                .and_then(|id| inner.timestamps.get(&id).cloned());
            LogRecord { message, timestamp }
        }))
    }

    async fn get_timestamp(&self, id: RecordId) -> Result<Option<TimestampRecord>> {
        Ok(self.inner.lock().await.timestamps.get(&id).cloned())
    }

    async fn pending_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.timestamp_record_id.is_none())
            .take(limit)
            .map(|r| Task {
                record_id: r.id,
                signature_hash: r.signature_hash.clone(),
                created_at: r.time,
            })
            .collect())
    }

    async fn count_pending_tasks(&self) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.timestamp_record_id.is_none())
            .count() as u64)
    }

    async fn attach_timestamp(
        &self,
        timestamp: NewTimestampRecord,
        proofs: Vec<(RecordId, HashChainProof)>,
    ) -> Result<TimestampRecord> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;

        for (id, _) in &proofs {
            match inner.records.get(id) {
                None => return Err(LogError::RecordNotFound(*id)),
                Some(r) if r.timestamp_record_id.is_some() => {
                    return Err(LogError::StoreFailed(format!(
                        "record {id} is already timestamped"
                    )))
                }
                Some(_) => {}
            }
        }

        inner.next_timestamp_id += 1;
        let timestamp = timestamp.with_id(inner.next_timestamp_id);
        inner.timestamps.insert(timestamp.id, timestamp.clone());
        for (id, proof) in proofs {
            if let Some(record) = inner.records.get_mut(&id) {
                record.timestamp_record_id = Some(timestamp.id);
                record.hash_chain = Some(proof);
            }
        }
        Ok(timestamp)
    }

    async fn archivable_records(&self, limit: usize) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.lock().await;
        let mut records: Vec<MessageRecord> = inner
            .records
            .values()
            .filter(|r| !r.archived && r.timestamp_record_id.is_some())
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.time, r.id));
        records.truncate(limit);
        Ok(records)
    }

    async fn load_digest_entry(&self) -> Result<Option<DigestEntry>> {
        Ok(self.inner.lock().await.digest.clone())
    }

    async fn mark_archived(&self, ids: &[RecordId], digest: DigestEntry) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        if let Some(id) = ids.iter().find(|id| !inner.records.contains_key(id)) {
            return Err(LogError::RecordNotFound(*id));
        }
        for id in ids {
            if let Some(record) = inner.records.get_mut(id) {
                record.archived = true;
            }
        }
        inner.digest = Some(digest);
        Ok(())
    }

    async fn delete_archived_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let mut inner = self.inner.lock().await;
        let before = inner.records.len();
        inner.records.retain(|_, r| !(r.archived && r.time < cutoff));
        Ok((before - inner.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::hashchain::{HashAlgorithm, HashChainBuilder};
    use crate::record::LogMessage;

    fn new_record(query_id: &str, time: DateTime<Utc>) -> NewMessageRecord {
        NewMessageRecord::new(
            LogMessage::new(query_id, b"body".to_vec()),
            b"sig".to_vec(),
            true,
            HashAlgorithm::Sha256,
            time,
        )
    }

    async fn attach(store: &MemoryRecordStore, ids: &[RecordId]) -> Result<TimestampRecord> {
        let mut builder = HashChainBuilder::new(HashAlgorithm::Sha256);
        let mut hashes = Vec::new();
        for id in ids {
            let record = store.get(*id).await.unwrap().unwrap();
            builder.add_input_hash(record.signature_hash.clone()).unwrap();
            hashes.push(*id);
        }
        let chain = builder.finish_building().unwrap();
        store
            .attach_timestamp(
                NewTimestampRecord {
                    time: Utc::now(),
                    timestamp: vec![0x30, 0x00],
                    hash_chain_result: chain.result,
                    algorithm: HashAlgorithm::Sha256,
                },
                hashes.into_iter().zip(chain.proofs).collect(),
            )
            .await
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_tasks_pending() {
        let store = MemoryRecordStore::new();
        let a = store.save(new_record("q1", Utc::now())).await.unwrap();
        let b = store.save(new_record("q2", Utc::now())).await.unwrap();
        assert!(b.id > a.id);

        let tasks = store.pending_tasks(10).await.unwrap();
        assert_eq!(tasks.iter().map(|t| t.record_id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(store.pending_tasks(1).await.unwrap().len(), 1);
        assert_eq!(store.count_pending_tasks().await.unwrap(), 2);

        attach(&store, &[a.id]).await.unwrap();
        assert_eq!(store.count_pending_tasks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_query_id_bounds_inclusive() {
        let store = MemoryRecordStore::new();
        let t0 = Utc::now() - Duration::minutes(10);
        let t1 = t0 + Duration::minutes(5);
        let early = store.save(new_record("q", t0)).await.unwrap();
        store.save(new_record("q", t1)).await.unwrap();

        let found = store.find_by_query_id("q", t0, t1).await.unwrap().unwrap();
        assert_eq!(found.message.id, early.id);

        let later = store.find_by_query_id("q", t1, t1).await.unwrap().unwrap();
        assert_eq!(later.message.time, t1);

        assert!(store
            .find_by_query_id("q", t1 + Duration::seconds(1), Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(store.find_by_query_id("other", t0, t1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attach_is_all_or_nothing() {
        let store = MemoryRecordStore::new();
        let a = store.save(new_record("q1", Utc::now())).await.unwrap();
        let b = store.save(new_record("q2", Utc::now())).await.unwrap();
        attach(&store, &[a.id]).await.unwrap();

        // b is fresh but a is already timestamped: nothing may change.
        assert!(attach(&store, &[b.id, a.id]).await.is_err());
        assert!(store.get(b.id).await.unwrap().unwrap().timestamp_record_id.is_none());
        assert_eq!(store.timestamp_count().await, 1);
    }

    #[tokio::test]
    async fn test_archive_and_clean() {
        let store = MemoryRecordStore::new();
        let old = Utc::now() - Duration::days(40);
        let a = store.save(new_record("q1", old)).await.unwrap();
        let b = store.save(new_record("q2", Utc::now())).await.unwrap();
        let c = store.save(new_record("q3", old)).await.unwrap();
        attach(&store, &[a.id, b.id]).await.unwrap();

        let archivable = store.archivable_records(10).await.unwrap();
        assert_eq!(archivable.len(), 2);

        let digest = DigestEntry {
            digest: vec![1; 32],
            archive_file_name: "mlog-test.zip".to_string(),
        };
        store.mark_archived(&[a.id, b.id], digest.clone()).await.unwrap();
        assert_eq!(store.load_digest_entry().await.unwrap(), Some(digest));
        assert!(store.archivable_records(10).await.unwrap().is_empty());

        let removed = store
            .delete_archived_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(a.id).await.unwrap().is_none());
        assert!(store.get(b.id).await.unwrap().is_some());
        assert!(store.get(c.id).await.unwrap().is_some());
        assert_eq!(store.timestamp_count().await, 1);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryRecordStore::new();
        store.set_failing(true);
        let err = store.save(new_record("q1", Utc::now())).await.unwrap_err();
        assert!(matches!(err, LogError::StoreFailed(_)));
        assert_eq!(store.record_count().await, 0);
    }
}
