//! Rows of the message log: message records, timestamp records and the archive chain tip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::hashchain::{HashAlgorithm, HashChainProof, HashChainVerifier};

/// Store-assigned, monotonically increasing row id.
pub type RecordId = i64;

/// A signed message handed to the log by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Correlation id extracted from the message by the caller.
    pub query_id: String,
    /// Raw signed payload.
    pub body: Vec<u8>,
}

impl LogMessage {
    pub fn new(query_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            query_id: query_id.into(),
            body: body.into(),
        }
    }
}

/// Digest binding a message digest to its detached signature.
///
/// This is the value fed into the timestamping hash chain.
pub fn signature_hash(algorithm: HashAlgorithm, message_hash: &[u8], signature: &[u8]) -> Vec<u8> {
    algorithm.digest_parts(&[message_hash, signature])
}

/// A record about to be saved; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageRecord {
    pub query_id: String,
    pub time: DateTime<Utc>,
    pub message: Vec<u8>,
    pub body_stored: bool,
    pub message_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub signature_hash: Vec<u8>,
    pub algorithm: HashAlgorithm,
}

impl NewMessageRecord {
    /// Build a record for `message`, dropping the body when `store_body` is false.
    pub fn new(
        message: LogMessage,
        signature: Vec<u8>,
        store_body: bool,
        algorithm: HashAlgorithm,
        time: DateTime<Utc>,
    ) -> Self {
        let message_hash = algorithm.digest(&message.body);
        let signature_hash = signature_hash(algorithm, &message_hash, &signature);
        Self {
            query_id: message.query_id,
            time,
            message: if store_body { message.body } else { Vec::new() },
            body_stored: store_body,
            message_hash,
            signature,
            signature_hash,
            algorithm,
        }
    }

    pub fn with_id(self, id: RecordId) -> MessageRecord {
        MessageRecord {
            id,
            query_id: self.query_id,
            time: self.time,
            message: self.message,
            body_stored: self.body_stored,
            message_hash: self.message_hash,
            signature: self.signature,
            signature_hash: self.signature_hash,
            algorithm: self.algorithm,
            archived: false,
            timestamp_record_id: None,
            hash_chain: None,
        }
    }
}

/// A logged message with its signature and timestamping state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: RecordId,
    pub query_id: String,
    pub time: DateTime<Utc>,
    /// Message body; empty when `body_stored` is false.
    #[serde(with = "serde_bytes")]
    pub message: Vec<u8>,
    pub body_stored: bool,
    pub message_hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub signature_hash: Vec<u8>,
    pub algorithm: HashAlgorithm,
    pub archived: bool,
    pub timestamp_record_id: Option<RecordId>,
    /// Membership proof in the batch covered by `timestamp_record_id`.
    pub hash_chain: Option<HashChainProof>,
}

impl MessageRecord {
    pub fn is_timestamped(&self) -> bool {
        self.timestamp_record_id.is_some()
    }

    /// Recompute the message and signature digests from the stored content.
    pub fn verify_content(&self) -> Result<()> {
        if self.body_stored && self.algorithm.digest(&self.message) != self.message_hash {
            return Err(LogError::HashChainInvalid(format!(
                "record {}: message body does not match its hash",
                self.id
            )));
        }
        let expected = signature_hash(self.algorithm, &self.message_hash, &self.signature);
        if expected != self.signature_hash {
            return Err(LogError::HashChainInvalid(format!(
                "record {}: signature hash mismatch",
                self.id
            )));
        }
        Ok(())
    }
}

/// A timestamp to be attached to a batch of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTimestampRecord {
    /// Time asserted by the TSA.
    pub time: DateTime<Utc>,
    /// DER-encoded RFC 3161 token.
    pub timestamp: Vec<u8>,
    pub hash_chain_result: Vec<u8>,
    pub algorithm: HashAlgorithm,
}

impl NewTimestampRecord {
    pub fn with_id(self, id: RecordId) -> TimestampRecord {
        TimestampRecord {
            id,
            time: self.time,
            timestamp: self.timestamp,
            hash_chain_result: self.hash_chain_result,
            algorithm: self.algorithm,
        }
    }
}

/// A TSA token covering one batch; never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRecord {
    pub id: RecordId,
    pub time: DateTime<Utc>,
    #[serde(with = "serde_bytes")]
    pub timestamp: Vec<u8>,
    pub hash_chain_result: Vec<u8>,
    pub algorithm: HashAlgorithm,
}

/// Tip of the cross-archive hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub digest: Vec<u8>,
    pub archive_file_name: String,
}

/// Result of a query-id lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub message: MessageRecord,
    pub timestamp: Option<TimestampRecord>,
}

/// Proof that one record is covered by a timestamp token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampProof {
    pub record_id: RecordId,
    pub timestamp_record: TimestampRecord,
    pub hash_chain: HashChainProof,
}

impl TimestampProof {
    /// Check that `record` is the input this proof covers and that the proof
    /// reproduces the chain result signed by the TSA.
    pub fn verify(&self, record: &MessageRecord) -> Result<()> {
        record.verify_content()?;
        HashChainVerifier::verify_input(
            &self.hash_chain,
            &record.signature_hash,
            &self.timestamp_record.hash_chain_result,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashchain::HashChainBuilder;

    fn record(store_body: bool) -> MessageRecord {
        NewMessageRecord::new(
            LogMessage::new("q1", b"<envelope/>".to_vec()),
            b"signature".to_vec(),
            store_body,
            HashAlgorithm::Sha256,
            Utc::now(),
        )
        .with_id(1)
    }

    #[test]
    fn test_new_record_hashes() {
        let rec = record(true);
        assert_eq!(rec.message, b"<envelope/>");
        assert_eq!(rec.message_hash, HashAlgorithm::Sha256.digest(b"<envelope/>"));
        assert!(!rec.archived);
        assert!(!rec.is_timestamped());
        rec.verify_content().unwrap();
    }

    #[test]
    fn test_body_not_stored_keeps_hashes() {
        let stored = record(true);
        let rec = record(false);
        assert!(rec.message.is_empty());
        assert!(!rec.body_stored);
        assert_eq!(rec.signature_hash, stored.signature_hash);
        rec.verify_content().unwrap();
    }

    #[test]
    fn test_timestamp_proof_detects_tampering() {
        let mut rec = record(true);
        let mut builder = HashChainBuilder::new(HashAlgorithm::Sha256);
        builder.add_input_hash(rec.signature_hash.clone()).unwrap();
        let chain = builder.finish_building().unwrap();

        let proof = TimestampProof {
            record_id: rec.id,
            timestamp_record: NewTimestampRecord {
                time: Utc::now(),
                timestamp: vec![],
                hash_chain_result: chain.result.clone(),
                algorithm: HashAlgorithm::Sha256,
            }
            .with_id(7),
            hash_chain: chain.proofs[0].clone(),
        };
        proof.verify(&rec).unwrap();

        rec.message[0] ^= 0x01;
        assert!(proof.verify(&rec).is_err());
    }
}
