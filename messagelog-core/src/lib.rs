//! Message Log Core - tamper-evident logging of signed messages
//!
//! This crate records signed messages, binds batches of them to trusted time
//! with RFC 3161 timestamps and moves aged records into chained archive files
//! that stay verifiable without the live database.
//!
//! # Features
//!
//! - Linear hash chains with per-record membership proofs
//! - RFC 3161 request encoding, response parsing and CMS token verification
//! - Zip archives chained to each other through their hash chain results
//! - Batched or immediate timestamping with fallback across TSAs
//! - Circuit breaker refusing new messages when timestamping keeps failing
//!
//! The `network` feature (default) adds the running engine ([`messagelog`])
//! and the HTTP TSA client. Without it the crate still verifies archives and
//! tokens offline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use messagelog_core::messagelog::{LogComponents, LogConfig, LogManager, MemoryRecordStore};
//! use messagelog_core::tsp::{MockTsa, StaticTimestampingServices};
//! use messagelog_core::{LogMessage, ZipArchiveWriter};
//!
//! # async fn example() -> messagelog_core::Result<()> {
//! let tsa = Arc::new(MockTsa::new()?);
//! let services = StaticTimestampingServices::new(
//!     vec!["http://tsa.example".to_string()],
//!     vec![tsa.certificate().clone()],
//! );
//! let manager = LogManager::start(
//!     LogConfig::default(),
//!     LogComponents {
//!         store: Arc::new(MemoryRecordStore::new()),
//!         tsa_client: tsa,
//!         services: Arc::new(services),
//!         archive_writer: Arc::new(ZipArchiveWriter::new("/var/lib/messagelog")?),
//!     },
//! )
//! .await?;
//!
//! let record = manager
//!     .log(LogMessage::new("q1", b"<envelope/>".to_vec()), b"sig".to_vec(), true)
//!     .await?;
//! manager.start_timestamping().await?;
//! let proof = manager.timestamp(record.id).await?;
//! proof.verify(&record)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod error;
pub mod hashchain;
pub mod record;
pub mod tsp;

#[cfg(feature = "network")]
pub mod messagelog;

pub use archive::{
    build_archive, read_archive, verify_archive, ArchiveChain, ArchiveContents, ArchiveReport,
    ArchiveWriter, ArchivedRecord, VerifyOptions, ZipArchiveWriter,
};
pub use error::{LogError, Result};
pub use hashchain::{
    HashAlgorithm, HashChain, HashChainBuilder, HashChainProof, HashChainVerifier,
};
pub use record::{
    DigestEntry, LogMessage, LogRecord, MessageRecord, NewMessageRecord, NewTimestampRecord,
    RecordId, TimestampProof, TimestampRecord,
};

#[cfg(feature = "network")]
pub use messagelog::{LogComponents, LogConfig, LogManager, RecordStore};
