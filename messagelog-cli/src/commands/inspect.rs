//! Inspect command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use messagelog_core::{read_archive, ArchivedRecord};

use crate::utils::format_time;

/// Execute the inspect command: list an archive's contents without verifying it.
pub fn execute(archive: PathBuf, json: bool) -> Result<()> {
    let contents = read_archive(&archive)
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;
    let chain = &contents.chain;

    let mut records = Vec::with_capacity(contents.entries.len());
    for link in &chain.links {
        let bytes = contents
            .entries
            .get(&link.entry)
            .with_context(|| format!("Archive entry {} is missing", link.entry))?;
        records.push(ArchivedRecord::from_cbor(bytes)?);
    }

    if json {
        let value = serde_json::json!({
            "archive": contents.file_name,
            "version": chain.version,
            "algorithm": chain.algorithm.name(),
            "seed": hex::encode(&chain.seed),
            "previous_archive": chain.previous_archive,
            "digest": hex::encode(&chain.result),
            "timestamps": contents.timestamps.len(),
            "records": records.iter().map(|r| serde_json::json!({
                "id": r.id,
                "query_id": r.query_id,
                "time": r.time,
                "body_stored": r.body_stored,
                "timestamp_record_id": r.timestamp_record_id,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", contents.file_name.bold());
    println!("   {} {}", "Format:".dimmed(), chain.version);
    println!("   {} {}", "Algorithm:".dimmed(), chain.algorithm);
    println!(
        "   {} {}",
        "Previous:".dimmed(),
        chain.previous_archive.as_deref().unwrap_or("(first archive)")
    );
    println!("   {} {}", "Seed:".dimmed(), hex::encode(&chain.seed));
    println!("   {} {}", "Digest:".dimmed(), hex::encode(&chain.result));
    println!("   {} {}", "Timestamps:".dimmed(), contents.timestamps.len());
    println!("   {} {}", "Records:".dimmed(), records.len());
    println!();
    for record in &records {
        println!(
            "   {:>8}  {}  {}  ts={}{}",
            record.id,
            format_time(Some(record.time)),
            record.query_id,
            record.timestamp_record_id,
            if record.body_stored { "" } else { "  (body not stored)" }
        );
    }
    Ok(())
}
