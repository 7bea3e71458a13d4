//! Chained archive files.
//!
//! An archive is a zip container:
//!
//! ```text
//! records/<id>.cbor       one ArchivedRecord per message record
//! timestamps/<id>.cbor    every TimestampRecord covering those records
//! hashchain.cbor          ArchiveChain: seed, one link per record, result
//! ```
//!
//! The leaf of a record is the hash of its `records/<id>.cbor` bytes. The chain
//! is seeded with the result of the previous archive, so replaying every archive
//! in order reproduces the current [`DigestEntry`](crate::record::DigestEntry).

mod verify;
mod writer;

pub use verify::{read_archive, verify_archive, ArchiveFile, ArchiveReport, VerifyOptions};
pub use writer::{ArchiveWriter, ZipArchiveWriter};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::hashchain::{HashAlgorithm, HashChainProof, HashChainVerifier};
use crate::record::{signature_hash, DigestEntry, MessageRecord, RecordId, TimestampRecord};

pub const HASH_CHAIN_ENTRY: &str = "hashchain.cbor";
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

pub fn record_entry_name(id: RecordId) -> String {
    format!("records/{id}.cbor")
}

pub fn timestamp_entry_name(id: RecordId) -> String {
    format!("timestamps/{id}.cbor")
}

/// Archived copy of a timestamped message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedRecord {
    pub id: RecordId,
    pub query_id: String,
    pub time: DateTime<Utc>,
    #[serde(with = "serde_bytes")]
    pub message: Vec<u8>,
    pub body_stored: bool,
    pub message_hash: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
    pub signature_hash: Vec<u8>,
    pub algorithm: HashAlgorithm,
    pub timestamp_record_id: RecordId,
    /// Membership proof in the timestamped batch.
    pub hash_chain: HashChainProof,
}

impl ArchivedRecord {
    pub fn from_record(record: &MessageRecord) -> Result<Self> {
        let (Some(timestamp_record_id), Some(hash_chain)) =
            (record.timestamp_record_id, record.hash_chain.clone())
        else {
            return Err(LogError::ArchiveFailed(format!(
                "record {} has no timestamp and cannot be archived",
                record.id
            )));
        };
        Ok(Self {
            id: record.id,
            query_id: record.query_id.clone(),
            time: record.time,
            message: record.message.clone(),
            body_stored: record.body_stored,
            message_hash: record.message_hash.clone(),
            signature: record.signature.clone(),
            signature_hash: record.signature_hash.clone(),
            algorithm: record.algorithm,
            timestamp_record_id,
            hash_chain,
        })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)?;
        Ok(out)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        Ok(ciborium::from_reader(bytes)?)
    }

    /// Check stored digests against the stored content.
    pub fn verify_content(&self) -> Result<()> {
        if self.body_stored && self.algorithm.digest(&self.message) != self.message_hash {
            return Err(LogError::HashChainInvalid(format!(
                "archived record {}: message body does not match its hash",
                self.id
            )));
        }
        if signature_hash(self.algorithm, &self.message_hash, &self.signature)
            != self.signature_hash
        {
            return Err(LogError::HashChainInvalid(format!(
                "archived record {}: signature hash mismatch",
                self.id
            )));
        }
        Ok(())
    }
}

/// One record's position in the archive chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLink {
    pub record_id: RecordId,
    pub entry: String,
    pub leaf: Vec<u8>,
}

/// The `hashchain.cbor` document of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveChain {
    pub version: u32,
    pub algorithm: HashAlgorithm,
    /// Result of the previous archive, or the zero digest for the first one.
    pub seed: Vec<u8>,
    pub previous_archive: Option<String>,
    pub links: Vec<ArchiveLink>,
    pub result: Vec<u8>,
}

impl ArchiveChain {
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out)?;
        Ok(out)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        Ok(ciborium::from_reader(bytes)?)
    }

    pub fn leaves(&self) -> Vec<Vec<u8>> {
        self.links.iter().map(|l| l.leaf.clone()).collect()
    }

    /// Recompute the chain result from the seed and leaves.
    pub fn replay(&self) -> Result<Vec<u8>> {
        HashChainVerifier::replay(self.algorithm, Some(&self.seed), &self.leaves())
    }

    /// Standalone membership proof for one record of the archive.
    pub fn proof_for(&self, record_id: RecordId) -> Result<HashChainProof> {
        let index = self
            .links
            .iter()
            .position(|l| l.record_id == record_id)
            .ok_or(LogError::RecordNotFound(record_id))?;
        let leaves = self.leaves();
        let prefix = if index == 0 {
            self.seed.clone()
        } else {
            HashChainVerifier::replay(self.algorithm, Some(&self.seed), &leaves[..index])?
        };
        Ok(HashChainProof {
            algorithm: self.algorithm,
            index,
            prefix: Some(prefix),
            leaf: leaves[index].clone(),
            suffix: leaves[index + 1..].to_vec(),
        })
    }
}

/// Everything needed to write one archive file.
#[derive(Debug, Clone)]
pub struct ArchiveContents {
    pub file_name: String,
    pub chain: ArchiveChain,
    /// Encoded `records/` entries in chain order.
    pub records: Vec<(RecordId, Vec<u8>)>,
    /// Encoded `timestamps/` entries keyed by timestamp record id.
    pub timestamps: BTreeMap<RecordId, Vec<u8>>,
    pub first_time: DateTime<Utc>,
    pub last_time: DateTime<Utc>,
}

impl ArchiveContents {
    /// The chain tip this archive produces.
    pub fn digest_entry(&self) -> DigestEntry {
        DigestEntry {
            digest: self.chain.result.clone(),
            archive_file_name: self.file_name.clone(),
        }
    }

    pub fn record_ids(&self) -> Vec<RecordId> {
        self.records.iter().map(|(id, _)| *id).collect()
    }
}

/// Size of a record once encoded into an archive, used to bound archive files.
pub fn encoded_record_size(record: &MessageRecord) -> usize {
    // Fixed overhead covers field names, digests and the CBOR framing.
    let proof_len = record
        .hash_chain
        .as_ref()
        .map(|p| (p.suffix.len() + 2) * (p.algorithm.output_len() + 2))
        .unwrap_or(0);
    record.message.len() + record.signature.len() + record.query_id.len() + proof_len + 256
}

/// File name encoding the time range of the archived records.
pub fn archive_file_name(first: DateTime<Utc>, last: DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "mlog-{}-{}-{}.zip",
        first.format("%Y%m%d%H%M%S"),
        last.format("%Y%m%d%H%M%S"),
        &random[..10]
    )
}

/// Assemble an archive over `records`, continuing the chain from `previous`.
///
/// `records` must be timestamped and in archiving order; `timestamps` must
/// hold every timestamp record they reference.
pub fn build_archive(
    algorithm: HashAlgorithm,
    previous: Option<&DigestEntry>,
    records: &[MessageRecord],
    timestamps: &[TimestampRecord],
) -> Result<ArchiveContents> {
    let (first, last) = match (records.first(), records.last()) {
        (Some(first), Some(last)) => (first.time, last.time),
        _ => {
            return Err(LogError::ArchiveFailed(
                "cannot build an archive without records".to_string(),
            ))
        }
    };

    let seed = match previous {
        Some(entry) => entry.digest.clone(),
        None => algorithm.zero_digest(),
    };
    if seed.len() != algorithm.output_len() {
        return Err(LogError::HashChainInvalid(format!(
            "previous archive digest is {} bytes, {algorithm} needs {}",
            seed.len(),
            algorithm.output_len()
        )));
    }

    let by_id: BTreeMap<RecordId, &TimestampRecord> =
        timestamps.iter().map(|t| (t.id, t)).collect();

    let mut links = Vec::with_capacity(records.len());
    let mut entries = Vec::with_capacity(records.len());
    let mut timestamp_entries = BTreeMap::new();
    for record in records {
        let archived = ArchivedRecord::from_record(record)?;
        let timestamp = by_id.get(&archived.timestamp_record_id).ok_or_else(|| {
            LogError::ArchiveFailed(format!(
                "timestamp record {} of record {} is missing",
                archived.timestamp_record_id, record.id
            ))
        })?;
        if !timestamp_entries.contains_key(&timestamp.id) {
            let mut encoded = Vec::new();
            ciborium::into_writer(*timestamp, &mut encoded)?;
            timestamp_entries.insert(timestamp.id, encoded);
        }

        let bytes = archived.to_cbor()?;
        links.push(ArchiveLink {
            record_id: record.id,
            entry: record_entry_name(record.id),
            leaf: algorithm.digest(&bytes),
        });
        entries.push((record.id, bytes));
    }

    let leaves: Vec<Vec<u8>> = links.iter().map(|l| l.leaf.clone()).collect();
    let result = HashChainVerifier::replay(algorithm, Some(&seed), &leaves)?;

    Ok(ArchiveContents {
        file_name: archive_file_name(first, last),
        chain: ArchiveChain {
            version: ARCHIVE_FORMAT_VERSION,
            algorithm,
            seed,
            previous_archive: previous.map(|p| p.archive_file_name.clone()),
            links,
            result,
        },
        records: entries,
        timestamps: timestamp_entries,
        first_time: first,
        last_time: last,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Duration;

    use super::*;
    use crate::hashchain::HashChainBuilder;
    use crate::record::{LogMessage, NewMessageRecord, NewTimestampRecord};
    use crate::tsp::{MockTsa, TimeStampRequest};

    /// Timestamped records plus their timestamp record, signed by `tsa`.
    pub fn timestamped_batch(
        tsa: &MockTsa,
        first_id: RecordId,
        count: usize,
    ) -> (Vec<MessageRecord>, TimestampRecord) {
        let alg = HashAlgorithm::Sha256;
        let start = Utc::now() - Duration::days(40);
        let mut records: Vec<MessageRecord> = (0..count)
            .map(|i| {
                NewMessageRecord::new(
                    LogMessage::new(format!("q{i}"), format!("<body n=\"{i}\"/>").into_bytes()),
                    format!("sig-{i}").into_bytes(),
                    true,
                    alg,
                    start + Duration::seconds(i as i64),
                )
                .with_id(first_id + i as RecordId)
            })
            .collect();

        let mut builder = HashChainBuilder::new(alg);
        for record in &records {
            builder.add_input_hash(record.signature_hash.clone()).unwrap();
        }
        let chain = builder.finish_building().unwrap();
        let request = TimeStampRequest::new(alg, chain.result.clone());
        let token = tsa.issue_token(&request).unwrap();
        let timestamp = NewTimestampRecord {
            time: Utc::now(),
            timestamp: token,
            hash_chain_result: chain.result.clone(),
            algorithm: alg,
        }
        .with_id(first_id);

        for (record, proof) in records.iter_mut().zip(chain.proofs) {
            record.timestamp_record_id = Some(timestamp.id);
            record.hash_chain = Some(proof);
        }
        (records, timestamp)
    }
}
