//! Property tests for chain continuity, batch membership and retention.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use messagelog_core::archive::build_archive;
use messagelog_core::messagelog::{LogCleaner, MemoryRecordStore, RecordStore};
use messagelog_core::tsp::{MockTsa, TimeStampRequest};
use messagelog_core::{
    DigestEntry, HashAlgorithm, HashChainBuilder, HashChainVerifier, LogMessage, MessageRecord,
    NewMessageRecord, NewTimestampRecord, TimestampProof, TimestampRecord,
};
use proptest::prelude::*;

fn tsa() -> &'static MockTsa {
    static TSA: OnceLock<MockTsa> = OnceLock::new();
    TSA.get_or_init(|| MockTsa::new().unwrap())
}

/// Timestamp `bodies` as one batch, numbering records from `first_id`.
fn timestamped_batch(bodies: &[Vec<u8>], first_id: i64) -> (Vec<MessageRecord>, TimestampRecord) {
    let alg = HashAlgorithm::Sha256;
    let mut records: Vec<MessageRecord> = bodies
        .iter()
        .enumerate()
        .map(|(i, body)| {
            NewMessageRecord::new(
                LogMessage::new(format!("q{i}"), body.clone()),
                format!("sig-{i}").into_bytes(),
                true,
                alg,
                Utc::now(),
            )
            .with_id(first_id + i as i64)
        })
        .collect();

    let mut builder = HashChainBuilder::new(alg);
    for record in &records {
        builder.add_input_hash(record.signature_hash.clone()).unwrap();
    }
    let chain = builder.finish_building().unwrap();
    let token = tsa()
        .issue_token(&TimeStampRequest::new(alg, chain.result.clone()))
        .unwrap();
    let timestamp = NewTimestampRecord {
        time: Utc::now(),
        timestamp: token,
        hash_chain_result: chain.result,
        algorithm: alg,
    }
    .with_id(first_id);

    for (record, proof) in records.iter_mut().zip(chain.proofs) {
        record.timestamp_record_id = Some(timestamp.id);
        record.hash_chain = Some(proof);
    }
    (records, timestamp)
}

fn bodies() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_archive_chain_continuity(batches in prop::collection::vec(bodies(), 1..5)) {
        let alg = HashAlgorithm::Sha256;
        let mut previous: Option<DigestEntry> = None;
        let mut next_id = 1;

        for batch in &batches {
            let (records, timestamp) = timestamped_batch(batch, next_id);
            next_id += batch.len() as i64;

            let contents = build_archive(alg, previous.as_ref(), &records, &[timestamp]).unwrap();
            let expected_seed = previous
                .as_ref()
                .map(|p| p.digest.clone())
                .unwrap_or_else(|| alg.zero_digest());
            prop_assert_eq!(&contents.chain.seed, &expected_seed);

            let replayed =
                HashChainVerifier::replay(alg, Some(&expected_seed), &contents.chain.leaves()).unwrap();
            prop_assert_eq!(&replayed, &contents.chain.result);
            previous = Some(contents.digest_entry());
        }
    }

    #[test]
    fn prop_batch_membership_detects_mutation(
        bodies in bodies(),
        pick in any::<prop::sample::Index>(),
        byte in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let (records, timestamp) = timestamped_batch(&bodies, 1);

        for record in &records {
            let proof = TimestampProof {
                record_id: record.id,
                timestamp_record: timestamp.clone(),
                hash_chain: record.hash_chain.clone().unwrap(),
            };
            prop_assert!(proof.verify(record).is_ok());
        }

        let mut tampered = pick.get(&records).clone();
        let proof = TimestampProof {
            record_id: tampered.id,
            timestamp_record: timestamp,
            hash_chain: tampered.hash_chain.clone().unwrap(),
        };
        let i = byte.index(tampered.message.len());
        tampered.message[i] ^= flip;
        prop_assert!(proof.verify(&tampered).is_err());
    }

    #[test]
    fn prop_cleaner_respects_retention(
        records in prop::collection::vec((0i64..60, any::<bool>()), 1..20),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let keep_days: i64 = 30;

        runtime.block_on(async {
            let store = Arc::new(MemoryRecordStore::new());
            let now = Utc::now();
            let mut archived_ids = Vec::new();
            for (age_days, archived) in &records {
                let record = store
                    .save(NewMessageRecord::new(
                        LogMessage::new("q", b"body".to_vec()),
                        b"sig".to_vec(),
                        true,
                        HashAlgorithm::Sha256,
                        now - ChronoDuration::days(*age_days) - ChronoDuration::minutes(1),
                    ))
                    .await
                    .unwrap();
                if *archived {
                    archived_ids.push(record.id);
                }
            }
            if !archived_ids.is_empty() {
                store
                    .mark_archived(
                        &archived_ids,
                        DigestEntry {
                            digest: vec![0; 32],
                            archive_file_name: "mlog-test.zip".to_string(),
                        },
                    )
                    .await
                    .unwrap();
            }
            let before = store.records().await;

            let cleaner = LogCleaner::new(
                store.clone(),
                Duration::from_secs(keep_days as u64 * 24 * 3600),
            );
            cleaner.clean().await.unwrap();
            let after = store.records().await;

            for record in &before {
                let kept = after.iter().any(|r| r.id == record.id);
                let expired = record.time < now - ChronoDuration::days(keep_days);
                if !record.archived || !expired {
                    assert!(kept, "record {} must survive cleaning", record.id);
                }
                if record.archived && expired {
                    assert!(!kept, "record {} is past retention", record.id);
                }
            }
        });
    }
}
