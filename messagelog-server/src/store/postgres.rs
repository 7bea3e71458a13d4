//! PostgreSQL implementation of the record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use messagelog_core::messagelog::{RecordStore, Task};
use messagelog_core::{
    DigestEntry, HashChainProof, LogError, LogRecord, MessageRecord, NewMessageRecord,
    NewTimestampRecord, RecordId, Result, TimestampRecord,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

const MESSAGE_COLUMNS: &str = "id, query_id, logged_at, message, body_stored, message_hash, \
     signature, signature_hash, algorithm, archived, timestamp_record_id, hash_chain";

const TIMESTAMP_COLUMNS: &str = "id, issued_at, token, hash_chain_result, algorithm";

/// PostgreSQL-backed record store.
///
/// Each mutating operation runs in its own transaction.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

/// Row type for message record queries.
#[derive(FromRow)]
struct MessageRow {
    id: i64,
    query_id: String,
    logged_at: DateTime<Utc>,
    message: Vec<u8>,
    body_stored: bool,
    message_hash: Vec<u8>,
    signature: Vec<u8>,
    signature_hash: Vec<u8>,
    algorithm: String,
    archived: bool,
    timestamp_record_id: Option<i64>,
    hash_chain: Option<Vec<u8>>,
}

impl TryFrom<MessageRow> for MessageRecord {
    type Error = LogError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let hash_chain = row
            .hash_chain
            .as_deref()
            .map(decode_proof)
            .transpose()?;
        Ok(Self {
            id: row.id,
            query_id: row.query_id,
            time: row.logged_at,
            message: row.message,
            body_stored: row.body_stored,
            message_hash: row.message_hash,
            signature: row.signature,
            signature_hash: row.signature_hash,
            algorithm: row.algorithm.parse()?,
            archived: row.archived,
            timestamp_record_id: row.timestamp_record_id,
            hash_chain,
        })
    }
}

/// Row type for timestamp record queries.
#[derive(FromRow)]
struct TimestampRow {
    id: i64,
    issued_at: DateTime<Utc>,
    token: Vec<u8>,
    hash_chain_result: Vec<u8>,
    algorithm: String,
}

impl TryFrom<TimestampRow> for TimestampRecord {
    type Error = LogError;

    fn try_from(row: TimestampRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            time: row.issued_at,
            timestamp: row.token,
            hash_chain_result: row.hash_chain_result,
            algorithm: row.algorithm.parse()?,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: i64,
    signature_hash: Vec<u8>,
    logged_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DigestRow {
    digest: Vec<u8>,
    archive_file_name: String,
}

fn store_error(err: sqlx::Error) -> LogError {
    LogError::StoreFailed(err.to_string())
}

fn encode_proof(proof: &HashChainProof) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(proof, &mut buf)?;
    Ok(buf)
}

fn decode_proof(bytes: &[u8]) -> Result<HashChainProof> {
    Ok(ciborium::from_reader(bytes)?)
}

impl PostgresRecordStore {
    /// Connect to the database and run pending migrations.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect(database_url)
            .await
            .map_err(store_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| LogError::StoreFailed(format!("migration failed: {e}")))?;

        tracing::info!("Record store connected and migrations applied");

        Ok(Self { pool })
    }

    /// Create a record store from an existing pool (for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_timestamp(
        &self,
        id: RecordId,
    ) -> Result<Option<TimestampRecord>> {
        let row: Option<TimestampRow> = sqlx::query_as(&format!(
            "SELECT {TIMESTAMP_COLUMNS} FROM timestamp_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        row.map(TimestampRecord::try_from).transpose()
    }

    /// Link one record to a timestamp inside `tx`, failing if it is missing or already linked.
    async fn link_record(
        tx: &mut Transaction<'_, Postgres>,
        timestamp_id: RecordId,
        record_id: RecordId,
        proof: &HashChainProof,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE message_records
            SET timestamp_record_id = $1, hash_chain = $2
            WHERE id = $3 AND timestamp_record_id IS NULL
            "#,
        )
        .bind(timestamp_id)
        .bind(encode_proof(proof)?)
        .bind(record_id)
        .execute(&mut **tx)
        .await
        .map_err(store_error)?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM message_records WHERE id = $1)")
                .bind(record_id)
                .fetch_one(&mut **tx)
                .await
                .map_err(store_error)?;
        if exists {
            Err(LogError::StoreFailed(format!(
                "record {record_id} is already timestamped"
            )))
        } else {
            Err(LogError::RecordNotFound(record_id))
        }
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn save(&self, record: NewMessageRecord) -> Result<MessageRecord> {
        // TIMESTAMPTZ keeps microseconds; the stored time is what lookups see
        let (id, logged_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO message_records
                (query_id, logged_at, message, body_stored, message_hash,
                 signature, signature_hash, algorithm)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, logged_at
            "#,
        )
        .bind(&record.query_id)
        .bind(record.time)
        .bind(&record.message)
        .bind(record.body_stored)
        .bind(&record.message_hash)
        .bind(&record.signature)
        .bind(&record.signature_hash)
        .bind(record.algorithm.name())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(MessageRecord {
            time: logged_at,
            ..record.with_id(id)
        })
    }

    async fn get(&self, id: RecordId) -> Result<Option<MessageRecord>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM message_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        row.map(MessageRecord::try_from).transpose()
    }

    async fn find_by_query_id(
        &self,
        query_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<LogRecord>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM message_records
            WHERE query_id = $1 AND logged_at >= $2 AND logged_at <= $3
            ORDER BY logged_at, id
            LIMIT 1
            "#
        ))
        .bind(query_id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let message = MessageRecord::try_from(row)?;
        let timestamp = match message.timestamp_record_id {
            Some(id) => self.fetch_timestamp(id).await?,
            None => None,
        };
        Ok(Some(LogRecord { message, timestamp }))
    }

    async fn get_timestamp(&self, id: RecordId) -> Result<Option<TimestampRecord>> {
        self.fetch_timestamp(id).await
    }

    async fn pending_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT id, signature_hash, logged_at FROM message_records
            WHERE timestamp_record_id IS NULL
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows
            .into_iter()
            .map(|row| Task {
                record_id: row.id,
                signature_hash: row.signature_hash,
                created_at: row.logged_at,
            })
            .collect())
    }

    async fn count_pending_tasks(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM message_records WHERE timestamp_record_id IS NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(count.max(0) as u64)
    }

    async fn attach_timestamp(
        &self,
        timestamp: NewTimestampRecord,
        proofs: Vec<(RecordId, HashChainProof)>,
    ) -> Result<TimestampRecord> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let (id, issued_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO timestamp_records (issued_at, token, hash_chain_result, algorithm)
            VALUES ($1, $2, $3, $4)
            RETURNING id, issued_at
            "#,
        )
        .bind(timestamp.time)
        .bind(&timestamp.timestamp)
        .bind(&timestamp.hash_chain_result)
        .bind(timestamp.algorithm.name())
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;

        // Dropping the transaction on error rolls everything back
        for (record_id, proof) in &proofs {
            Self::link_record(&mut tx, id, *record_id, proof).await?;
        }

        tx.commit().await.map_err(store_error)?;
        Ok(TimestampRecord {
            time: issued_at,
            ..timestamp.with_id(id)
        })
    }

    async fn archivable_records(&self, limit: usize) -> Result<Vec<MessageRecord>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM message_records
            WHERE archived = FALSE AND timestamp_record_id IS NOT NULL
            ORDER BY logged_at, id
            LIMIT $1
            "#
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(MessageRecord::try_from).collect()
    }

    async fn load_digest_entry(&self) -> Result<Option<DigestEntry>> {
        let row: Option<DigestRow> =
            sqlx::query_as("SELECT digest, archive_file_name FROM digest_entry WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(row.map(|row| DigestEntry {
            digest: row.digest,
            archive_file_name: row.archive_file_name,
        }))
    }

    async fn mark_archived(&self, ids: &[RecordId], digest: DigestEntry) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let updated = sqlx::query("UPDATE message_records SET archived = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?
            .rows_affected();
        if updated != ids.len() as u64 {
            return Err(LogError::StoreFailed(format!(
                "marked {updated} of {} records archived",
                ids.len()
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO digest_entry (id, digest, archive_file_name, updated_at)
            VALUES (1, $1, $2, NOW())
            ON CONFLICT (id) DO UPDATE SET
                digest = EXCLUDED.digest,
                archive_file_name = EXCLUDED.archive_file_name,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&digest.digest)
        .bind(&digest.archive_file_name)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)
    }

    async fn delete_archived_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let deleted =
            sqlx::query("DELETE FROM message_records WHERE archived = TRUE AND logged_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(store_error)?
                .rows_affected();
        Ok(deleted)
    }
}
