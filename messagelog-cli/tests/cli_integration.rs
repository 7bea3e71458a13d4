//! CLI integration tests for messagelog-cli.
//!
//! These tests build real archives with the core library, then run the
//! actual binary against them and check outputs and exit codes.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use chrono::{Duration, Utc};
use messagelog_core::archive::{build_archive, ArchiveWriter, ZipArchiveWriter};
use messagelog_core::tsp::{MockTsa, TimeStampRequest};
use messagelog_core::{
    DigestEntry, HashAlgorithm, HashChainBuilder, LogMessage, MessageRecord, NewMessageRecord,
    NewTimestampRecord, TimestampRecord,
};
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the messagelog binary.
fn messagelog() -> Command {
    Command::cargo_bin("messagelog").unwrap()
}

/// Archives written into a temp dir, signed by one mock TSA.
struct Fixture {
    dir: TempDir,
    tsa: MockTsa,
    writer: ZipArchiveWriter,
    previous: Option<DigestEntry>,
    next_id: i64,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let writer = ZipArchiveWriter::new(dir.path()).unwrap();
        Self {
            dir,
            tsa: MockTsa::new().unwrap(),
            writer,
            previous: None,
            next_id: 1,
        }
    }

    /// Timestamp `query_ids` as one batch and archive them after the previous archive.
    fn archive(&mut self, query_ids: &[&str]) -> (PathBuf, Vec<u8>) {
        let alg = HashAlgorithm::Sha256;
        let start = Utc::now() - Duration::hours(1);
        let mut records: Vec<MessageRecord> = query_ids
            .iter()
            .enumerate()
            .map(|(i, query_id)| {
                let id = self.next_id + i as i64;
                NewMessageRecord::new(
                    LogMessage::new(*query_id, format!("<soap:Envelope id=\"{id}\"/>")),
                    format!("signature-{id}").into_bytes(),
                    true,
                    alg,
                    start + Duration::seconds(id),
                )
                .with_id(id)
            })
            .collect();

        let mut builder = HashChainBuilder::new(alg);
        for record in &records {
            builder.add_input_hash(record.signature_hash.clone()).unwrap();
        }
        let chain = builder.finish_building().unwrap();
        let token = self
            .tsa
            .issue_token(&TimeStampRequest::new(alg, chain.result.clone()))
            .unwrap();
        let timestamp: TimestampRecord = NewTimestampRecord {
            time: Utc::now(),
            timestamp: token,
            hash_chain_result: chain.result,
            algorithm: alg,
        }
        .with_id(self.next_id);
        for (record, proof) in records.iter_mut().zip(chain.proofs) {
            record.timestamp_record_id = Some(timestamp.id);
            record.hash_chain = Some(proof);
        }
        self.next_id += query_ids.len() as i64;

        let contents = build_archive(alg, self.previous.as_ref(), &records, &[timestamp]).unwrap();
        let path = self.writer.write(&contents).unwrap();
        self.previous = Some(contents.digest_entry());
        (path, contents.chain.result)
    }

    fn cert_file(&self) -> PathBuf {
        let path = self.dir.path().join("tsa.pem");
        fs::write(&path, self.tsa.certificate_pem().unwrap()).unwrap();
        path
    }
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays_usage() {
    messagelog()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Offline verification of secure message log archives",
        ))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("chain"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_version_displays_version() {
    messagelog()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("messagelog"));
}

#[test]
fn test_help_shows_exit_codes() {
    messagelog()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("65"))
        .stdout(predicate::str::contains("66"));
}

#[test]
fn test_verify_help_shows_options() {
    messagelog()
        .args(["verify", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ARCHIVE"))
        .stdout(predicate::str::contains("--previous-digest"))
        .stdout(predicate::str::contains("--expect-digest"))
        .stdout(predicate::str::contains("--tsa-cert"));
}

#[test]
fn test_no_subcommand_is_usage_error() {
    messagelog().assert().failure().code(2);
}

// ============================================================================
// Verify Tests
// ============================================================================

#[test]
fn test_verify_valid_archive() {
    let mut fx = Fixture::new();
    let (archive, _) = fx.archive(&["q1", "q2", "q3"]);
    let cert = fx.cert_file();

    messagelog()
        .args(["verify", path_arg(&archive), "--tsa-cert", path_arg(&cert)])
        .assert()
        .success()
        .stdout(predicate::str::contains("VALID"))
        .stdout(predicate::str::contains("Signatures valid"))
        .stdout(predicate::str::contains("(first archive)"));
}

#[test]
fn test_verify_without_certificates_warns() {
    let mut fx = Fixture::new();
    let (archive, _) = fx.archive(&["q1"]);

    messagelog()
        .args(["verify", path_arg(&archive)])
        .assert()
        .success()
        .stdout(predicate::str::contains("not checked"));
}

#[test]
fn test_verify_json_report() {
    let mut fx = Fixture::new();
    let (archive, digest) = fx.archive(&["q1", "q2"]);

    let output = messagelog()
        .args(["verify", path_arg(&archive), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["valid"], true);
    assert_eq!(report["record_count"], 2);
    assert_eq!(report["digest"], hex::encode(&digest));
    assert_eq!(report["algorithm"], "SHA-256");
}

#[test]
fn test_verify_expected_digest() {
    let mut fx = Fixture::new();
    let (archive, digest) = fx.archive(&["q1"]);

    messagelog()
        .args(["verify", path_arg(&archive), "--expect-digest", &hex::encode(&digest)])
        .assert()
        .success();

    messagelog()
        .args(["verify", path_arg(&archive), "--expect-digest", &"ab".repeat(32)])
        .assert()
        .failure()
        .code(65)
        .stdout(predicate::str::contains("INVALID"));
}

#[test]
fn test_verify_previous_digest() {
    let mut fx = Fixture::new();
    let (_, first_digest) = fx.archive(&["q1"]);
    let (second, _) = fx.archive(&["q2"]);

    messagelog()
        .args([
            "verify",
            path_arg(&second),
            "--previous-digest",
            &hex::encode(&first_digest),
        ])
        .assert()
        .success();

    messagelog()
        .args(["verify", path_arg(&second), "--previous-digest", &"00".repeat(32)])
        .assert()
        .failure()
        .code(65)
        .stderr(predicate::str::contains("does not continue previous digest"));
}

#[test]
fn test_verify_untrusted_tsa_fails() {
    let mut fx = Fixture::new();
    let (archive, _) = fx.archive(&["q1"]);

    let other = MockTsa::new().unwrap();
    let cert = fx.dir.path().join("other.pem");
    fs::write(&cert, other.certificate_pem().unwrap()).unwrap();

    messagelog()
        .args(["verify", path_arg(&archive), "--tsa-cert", path_arg(&cert)])
        .assert()
        .failure()
        .code(65);
}

#[test]
fn test_verify_corrupt_archive_fails() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("mlog-broken.zip");
    fs::write(&archive, b"definitely not a zip file").unwrap();

    messagelog()
        .args(["verify", path_arg(&archive)])
        .assert()
        .failure()
        .code(65);
}

#[test]
fn test_verify_missing_archive_is_input_error() {
    messagelog()
        .args(["verify", "/nonexistent/mlog-missing.zip"])
        .assert()
        .failure()
        .code(66)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_verify_bad_hex_is_usage_error() {
    let mut fx = Fixture::new();
    let (archive, _) = fx.archive(&["q1"]);

    messagelog()
        .args(["verify", path_arg(&archive), "--previous-digest", "not-hex"])
        .assert()
        .failure()
        .code(64);
}

#[test]
fn test_verify_quiet_prints_nothing() {
    let mut fx = Fixture::new();
    let (archive, _) = fx.archive(&["q1"]);

    messagelog()
        .args(["--quiet", "verify", path_arg(&archive)])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ============================================================================
// Chain Tests
// ============================================================================

#[test]
fn test_chain_in_order() {
    let mut fx = Fixture::new();
    let (first, _) = fx.archive(&["q1", "q2"]);
    let (second, _) = fx.archive(&["q3"]);
    let (third, _) = fx.archive(&["q4", "q5"]);
    let cert = fx.cert_file();

    messagelog()
        .args([
            "chain",
            path_arg(&first),
            path_arg(&second),
            path_arg(&third),
            "--tsa-cert",
            path_arg(&cert),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 archive(s) form an unbroken chain"));
}

#[test]
fn test_chain_out_of_order_fails() {
    let mut fx = Fixture::new();
    let (first, _) = fx.archive(&["q1"]);
    let (second, _) = fx.archive(&["q2"]);

    messagelog()
        .args(["chain", path_arg(&second), path_arg(&first)])
        .assert()
        .failure()
        .code(65)
        .stderr(predicate::str::contains("Chain broken"));
}

#[test]
fn test_chain_with_gap_fails() {
    let mut fx = Fixture::new();
    let (first, _) = fx.archive(&["q1"]);
    fx.archive(&["q2"]);
    let (third, _) = fx.archive(&["q3"]);

    messagelog()
        .args(["chain", path_arg(&first), path_arg(&third)])
        .assert()
        .failure()
        .code(65);
}

// ============================================================================
// Inspect Tests
// ============================================================================

#[test]
fn test_inspect_lists_records() {
    let mut fx = Fixture::new();
    let (archive, digest) = fx.archive(&["query-alpha", "query-beta"]);

    messagelog()
        .args(["inspect", path_arg(&archive)])
        .assert()
        .success()
        .stdout(predicate::str::contains("query-alpha"))
        .stdout(predicate::str::contains("query-beta"))
        .stdout(predicate::str::contains(hex::encode(&digest)));
}

#[test]
fn test_inspect_json() {
    let mut fx = Fixture::new();
    fx.archive(&["q1"]);
    let (archive, _) = fx.archive(&["q2", "q3"]);

    let output = messagelog()
        .args(["inspect", path_arg(&archive), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let listing: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listing["records"].as_array().unwrap().len(), 2);
    assert_eq!(listing["records"][0]["query_id"], "q2");
    assert!(listing["previous_archive"].is_string());
}
