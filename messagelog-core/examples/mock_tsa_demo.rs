//! Example running the message log against the in-process mock TSA.
//!
//! Run with: cargo run -p messagelog-core --example mock_tsa_demo

use std::sync::Arc;

use messagelog_core::messagelog::{LogComponents, LogConfig, LogManager, MemoryRecordStore};
use messagelog_core::tsp::{MockTsa, StaticTimestampingServices};
use messagelog_core::{verify_archive, LogMessage, VerifyOptions, ZipArchiveWriter};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> messagelog_core::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::new("messagelog_core=debug,info"))
        .with_target(true)
        .with_thread_ids(false)
        .init();

    println!("=== Message Log Demo ===\n");

    let archive_dir = std::env::temp_dir().join("messagelog-demo");
    let tsa = Arc::new(MockTsa::new()?);
    let services = StaticTimestampingServices::new(
        vec!["http://mock-tsa.local".to_string()],
        vec![tsa.certificate().clone()],
    );
    let manager = LogManager::start(
        LogConfig::default(),
        LogComponents {
            store: Arc::new(MemoryRecordStore::new()),
            tsa_client: tsa.clone(),
            services: Arc::new(services),
            archive_writer: Arc::new(ZipArchiveWriter::new(&archive_dir)?),
        },
    )
    .await?;

    for query_id in ["q1", "q2", "q3"] {
        let body = format!("<soap:Envelope id=\"{query_id}\"/>");
        let record = manager
            .log(LogMessage::new(query_id, body.into_bytes()), b"signature".to_vec(), true)
            .await?;
        println!("Logged record {} ({query_id})", record.id);
    }

    let timestamped = manager.start_timestamping().await?;
    println!("\nTimestamped {timestamped} records with one TSA request");

    let summary = manager.start_archiving().await?;
    for name in &summary.archives {
        let report = verify_archive(
            &archive_dir.join(name),
            &VerifyOptions {
                previous_digest: None,
                trusted_certificates: vec![tsa.certificate().clone()],
            },
        )?;
        println!("\nArchive {name}");
        println!("   Records: {}", report.record_count);
        println!("   Digest:  {}", hex::encode(&report.digest));
    }

    manager.shutdown().await;
    Ok(())
}
