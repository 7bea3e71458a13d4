use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use openssl::x509::X509;
use tracing::debug;
use zip::ZipArchive;

use super::{
    record_entry_name, timestamp_entry_name, ArchiveChain, ArchivedRecord, HASH_CHAIN_ENTRY,
};
use crate::error::{LogError, Result};
use crate::hashchain::{HashAlgorithm, HashChainVerifier};
use crate::record::{RecordId, TimestampRecord};
use crate::tsp::{decode_token, verify_token};

/// Largest entry accepted when reading an archive.
pub const MAX_ENTRY_SIZE: u64 = 64 * 1024 * 1024;

/// What to check beyond the archive's internal consistency.
#[derive(Default)]
pub struct VerifyOptions {
    /// Result of the preceding archive; the seed must equal it.
    pub previous_digest: Option<Vec<u8>>,
    /// TSA certificates; when empty, token signatures are not checked.
    pub trusted_certificates: Vec<X509>,
}

/// Decoded contents of an archive file.
#[derive(Debug, Clone)]
pub struct ArchiveFile {
    pub file_name: String,
    pub chain: ArchiveChain,
    /// Raw `records/` entries keyed by entry name.
    pub entries: BTreeMap<String, Vec<u8>>,
    pub timestamps: BTreeMap<RecordId, TimestampRecord>,
}

/// Summary of a verified archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub file_name: String,
    pub algorithm: HashAlgorithm,
    pub record_count: usize,
    pub timestamp_count: usize,
    pub seed: Vec<u8>,
    pub previous_archive: Option<String>,
    pub digest: Vec<u8>,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub signatures_checked: bool,
}

/// Read every entry of an archive without verifying anything.
pub fn read_archive(path: &Path) -> Result<ArchiveFile> {
    read_archive_bounded(path, MAX_ENTRY_SIZE)
}

fn read_archive_bounded(path: &Path, max_entry_size: u64) -> Result<ArchiveFile> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(file)?;

    let mut chain = None;
    let mut entries = BTreeMap::new();
    let mut timestamps = BTreeMap::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().to_string();
        let mut bytes = Vec::new();
        (&mut entry).take(max_entry_size + 1).read_to_end(&mut bytes)?;
        if bytes.len() as u64 > max_entry_size {
            return Err(LogError::HashChainInvalid(format!(
                "archive entry {name} exceeds {max_entry_size} bytes"
            )));
        }

        if name == HASH_CHAIN_ENTRY {
            chain = Some(ArchiveChain::from_cbor(&bytes)?);
        } else if name.starts_with("records/") {
            entries.insert(name, bytes);
        } else if name.starts_with("timestamps/") {
            let timestamp: TimestampRecord = ciborium::from_reader(bytes.as_slice())?;
            if name != timestamp_entry_name(timestamp.id) {
                return Err(LogError::HashChainInvalid(format!(
                    "entry {name} holds timestamp {}",
                    timestamp.id
                )));
            }
            timestamps.insert(timestamp.id, timestamp);
        } else {
            return Err(LogError::HashChainInvalid(format!(
                "unexpected archive entry {name}"
            )));
        }
    }

    let chain = chain.ok_or_else(|| {
        LogError::HashChainInvalid(format!("archive has no {HASH_CHAIN_ENTRY}"))
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ArchiveFile {
        file_name,
        chain,
        entries,
        timestamps,
    })
}

/// Verify an archive file end to end.
///
/// Every record must match its chain link, its own digests, its batch proof and
/// the covering timestamp token; the links must replay from the seed to the
/// recorded result.
pub fn verify_archive(path: &Path, options: &VerifyOptions) -> Result<ArchiveReport> {
    let archive = read_archive(path)?;
    let chain = &archive.chain;
    let alg = chain.algorithm;

    if let Some(previous) = &options.previous_digest {
        if *previous != chain.seed {
            return Err(LogError::HashChainInvalid(format!(
                "archive seed {} does not continue previous digest {}",
                hex::encode(&chain.seed),
                hex::encode(previous)
            )));
        }
    }
    if chain.links.len() != archive.entries.len() {
        return Err(LogError::HashChainInvalid(format!(
            "chain has {} links but archive holds {} records",
            chain.links.len(),
            archive.entries.len()
        )));
    }
    let mut linked_ids = BTreeSet::new();
    for link in &chain.links {
        if !linked_ids.insert(link.record_id) {
            return Err(LogError::HashChainInvalid(format!(
                "record {} is linked more than once",
                link.record_id
            )));
        }
        if link.entry != record_entry_name(link.record_id) {
            return Err(LogError::HashChainInvalid(format!(
                "link of record {} points at {}",
                link.record_id, link.entry
            )));
        }
    }
    if let Some(unlinked) = archive
        .entries
        .keys()
        .find(|name| !chain.links.iter().any(|l| l.entry == **name))
    {
        return Err(LogError::HashChainInvalid(format!(
            "entry {unlinked} is not linked into the chain"
        )));
    }

    let mut checked_tokens = BTreeSet::new();
    let mut first_time = None;
    let mut last_time = None;
    for link in &chain.links {
        let bytes = archive.entries.get(&link.entry).ok_or_else(|| {
            LogError::HashChainInvalid(format!("missing archive entry {}", link.entry))
        })?;
        if alg.digest(bytes) != link.leaf {
            return Err(LogError::HashChainInvalid(format!(
                "entry {} does not match its chain link",
                link.entry
            )));
        }

        let record = ArchivedRecord::from_cbor(bytes)?;
        if record.id != link.record_id {
            return Err(LogError::HashChainInvalid(format!(
                "entry {} holds record {}, expected {}",
                link.entry, record.id, link.record_id
            )));
        }
        record.verify_content()?;

        let timestamp = archive
            .timestamps
            .get(&record.timestamp_record_id)
            .ok_or_else(|| {
                LogError::HashChainInvalid(format!(
                    "timestamp {} of record {} is missing",
                    record.timestamp_record_id, record.id
                ))
            })?;
        HashChainVerifier::verify_input(
            &record.hash_chain,
            &record.signature_hash,
            &timestamp.hash_chain_result,
        )?;

        if checked_tokens.insert(timestamp.id) {
            let info = if options.trusted_certificates.is_empty() {
                decode_token(&timestamp.timestamp)?
            } else {
                verify_token(&timestamp.timestamp, &options.trusted_certificates)?
            };
            if info.algorithm != timestamp.algorithm || info.digest != timestamp.hash_chain_result
            {
                return Err(LogError::InvalidToken(format!(
                    "token of timestamp {} does not cover its hash chain result",
                    timestamp.id
                )));
            }
        }

        first_time = first_time.or(Some(record.time));
        last_time = Some(record.time);
    }

    if let Some(unused) = archive.timestamps.keys().find(|id| !checked_tokens.contains(*id)) {
        return Err(LogError::HashChainInvalid(format!(
            "timestamp {unused} covers no archived record"
        )));
    }

    let replayed = chain.replay()?;
    if replayed != chain.result {
        return Err(LogError::HashChainInvalid(format!(
            "archive chain replays to {}, recorded {}",
            hex::encode(&replayed),
            hex::encode(&chain.result)
        )));
    }

    debug!(archive = %archive.file_name, records = chain.links.len(), "Archive verified");
    Ok(ArchiveReport {
        file_name: archive.file_name.clone(),
        algorithm: alg,
        record_count: chain.links.len(),
        timestamp_count: archive.timestamps.len(),
        seed: chain.seed.clone(),
        previous_archive: chain.previous_archive.clone(),
        digest: chain.result.clone(),
        first_time,
        last_time,
        signatures_checked: !options.trusted_certificates.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::archive::test_support::timestamped_batch;
    use crate::archive::{build_archive, ArchiveContents, ArchiveWriter, ZipArchiveWriter};
    use crate::tsp::MockTsa;

    fn trusted(tsa: &MockTsa) -> VerifyOptions {
        VerifyOptions {
            previous_digest: None,
            trusted_certificates: vec![tsa.certificate().clone()],
        }
    }

    #[test]
    fn test_verify_written_archive() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ZipArchiveWriter::new(dir.path()).unwrap();
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 3);
        let contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();
        let path = writer.write(&contents).unwrap();

        let report = verify_archive(&path, &trusted(&tsa)).unwrap();
        assert_eq!(report.record_count, 3);
        assert_eq!(report.timestamp_count, 1);
        assert_eq!(report.digest, contents.chain.result);
        assert!(report.signatures_checked);

        let unsigned = verify_archive(&path, &VerifyOptions::default()).unwrap();
        assert!(!unsigned.signatures_checked);
    }

    #[test]
    fn test_wrong_previous_digest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ZipArchiveWriter::new(dir.path()).unwrap();
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 2);
        let contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();
        let path = writer.write(&contents).unwrap();

        let options = VerifyOptions {
            previous_digest: Some(vec![0xAA; 32]),
            trusted_certificates: vec![],
        };
        let err = verify_archive(&path, &options).unwrap_err();
        assert!(matches!(err, LogError::HashChainInvalid(_)));
    }

    #[test]
    fn test_tampered_record_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 2);
        let mut contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();

        // Swap in a record whose body changed after the chain was built.
        let mut forged = ArchivedRecord::from_record(&records[1]).unwrap();
        forged.message = b"<forged/>".to_vec();
        contents.records[1].1 = forged.to_cbor().unwrap();

        let path = ZipArchiveWriter::new(dir.path())
            .unwrap()
            .write(&contents)
            .unwrap();
        assert!(verify_archive(&path, &trusted(&tsa)).is_err());
    }

    fn write_and_verify(tsa: &MockTsa, contents: &ArchiveContents) -> Result<ArchiveReport> {
        let dir = tempfile::tempdir().unwrap();
        let path = ZipArchiveWriter::new(dir.path())
            .unwrap()
            .write(contents)
            .unwrap();
        verify_archive(&path, &trusted(tsa))
    }

    #[test]
    fn test_duplicated_link_rejected() {
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 2);
        let mut contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();

        // Forge record 2 and point both links at the untouched record 1.
        let mut forged = ArchivedRecord::from_record(&records[1]).unwrap();
        forged.message = b"<forged/>".to_vec();
        contents.records[1].1 = forged.to_cbor().unwrap();
        contents.chain.links[1] = contents.chain.links[0].clone();
        contents.chain.result = contents.chain.replay().unwrap();

        let err = write_and_verify(&tsa, &contents).unwrap_err();
        assert!(matches!(err, LogError::HashChainInvalid(_)));
    }

    #[test]
    fn test_link_to_foreign_entry_rejected() {
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 2);
        let mut contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();

        contents.chain.links[1].entry = record_entry_name(1);
        contents.chain.links[1].leaf = contents.chain.links[0].leaf.clone();
        contents.chain.result = contents.chain.replay().unwrap();

        let err = write_and_verify(&tsa, &contents).unwrap_err();
        assert!(matches!(err, LogError::HashChainInvalid(_)));
    }

    #[test]
    fn test_unlinked_record_entry_rejected() {
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 3);
        let mut contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();

        contents.chain.links.pop();
        contents.chain.result = contents.chain.replay().unwrap();

        let err = write_and_verify(&tsa, &contents).unwrap_err();
        assert!(matches!(err, LogError::HashChainInvalid(_)));
    }

    #[test]
    fn test_unreferenced_timestamp_rejected() {
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 2);
        let mut contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();

        let (_, stray) = timestamped_batch(&tsa, 10, 1);
        let mut encoded = Vec::new();
        ciborium::into_writer(&stray, &mut encoded).unwrap();
        contents.timestamps.insert(stray.id, encoded);

        let err = write_and_verify(&tsa, &contents).unwrap_err();
        assert!(matches!(err, LogError::HashChainInvalid(_)));
    }

    #[test]
    fn test_untrusted_tsa_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tsa = MockTsa::new().unwrap();
        let other = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 1);
        let contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();
        let path = ZipArchiveWriter::new(dir.path())
            .unwrap()
            .write(&contents)
            .unwrap();

        let err = verify_archive(&path, &trusted(&other)).unwrap_err();
        assert!(matches!(err, LogError::InvalidToken(_)));
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tsa = MockTsa::new().unwrap();
        let (records, ts) = timestamped_batch(&tsa, 1, 1);
        let contents = build_archive(HashAlgorithm::Sha256, None, &records, &[ts]).unwrap();
        let path = ZipArchiveWriter::new(dir.path())
            .unwrap()
            .write(&contents)
            .unwrap();

        assert!(read_archive_bounded(&path, MAX_ENTRY_SIZE).is_ok());
        let err = read_archive_bounded(&path, 16).unwrap_err();
        assert!(matches!(err, LogError::HashChainInvalid(_)));
    }

    #[test]
    fn test_not_a_zip_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a zip").unwrap();
        assert!(verify_archive(file.path(), &VerifyOptions::default()).is_err());
    }
}
