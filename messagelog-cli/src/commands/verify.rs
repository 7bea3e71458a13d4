//! Verify command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use messagelog_core::{verify_archive, ArchiveReport, LogError, VerifyOptions};
use tracing::{error, info};

use crate::utils::{display_name, format_time, load_certificates, parse_digest};

/// Options of the verify command.
pub struct VerifyArgs {
    pub archive: PathBuf,
    pub previous_digest: Option<String>,
    pub expect_digest: Option<String>,
    pub tsa_certs: Vec<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

/// Execute the verify command.
pub fn execute(args: VerifyArgs) -> Result<()> {
    let options = VerifyOptions {
        previous_digest: args
            .previous_digest
            .as_deref()
            .map(|d| parse_digest("--previous-digest", d))
            .transpose()?,
        trusted_certificates: load_certificates(&args.tsa_certs)?,
    };
    let expected = args
        .expect_digest
        .as_deref()
        .map(|d| parse_digest("--expect-digest", d))
        .transpose()?;

    let result = verify_archive(&args.archive, &options).and_then(|report| {
        match &expected {
            Some(expected) if *expected != report.digest => {
                Err(LogError::HashChainInvalid(format!(
                    "archive digest {} does not match expected {}",
                    hex::encode(&report.digest),
                    hex::encode(expected)
                )))
            }
            _ => Ok(report),
        }
    });

    match result {
        Ok(report) => {
            info!(
                archive = %report.file_name,
                records = report.record_count,
                "Archive verified"
            );
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
            } else if !args.quiet {
                print_valid(&report);
            }
            Ok(())
        }
        Err(e) => {
            error!(archive = %args.archive.display(), error = %e, "Archive verification failed");
            if !args.quiet && !args.json && !matches!(e, LogError::Io(_)) {
                print_invalid(&args.archive, &e);
            }
            Err(e).with_context(|| {
                format!("Verification failed for {}", args.archive.display())
            })
        }
    }
}

/// JSON form of a verification report.
pub fn report_json(report: &ArchiveReport) -> serde_json::Value {
    serde_json::json!({
        "archive": report.file_name,
        "valid": true,
        "algorithm": report.algorithm.name(),
        "record_count": report.record_count,
        "timestamp_count": report.timestamp_count,
        "seed": hex::encode(&report.seed),
        "previous_archive": report.previous_archive,
        "digest": hex::encode(&report.digest),
        "first_time": report.first_time,
        "last_time": report.last_time,
        "signatures_checked": report.signatures_checked,
    })
}

fn print_valid(report: &ArchiveReport) {
    println!();
    println!("{}", "╔════════════════════════════════════════╗".green());
    println!(
        "{}",
        "║                VALID                   ║".green().bold()
    );
    println!("{}", "╚════════════════════════════════════════╝".green());
    println!();
    println!("   {} {}", "Archive:".dimmed(), report.file_name);
    println!("   {} {}", "Records:".dimmed(), report.record_count);
    println!("   {} {}", "Timestamps:".dimmed(), report.timestamp_count);
    println!("   {} {}", "Algorithm:".dimmed(), report.algorithm);
    println!(
        "   {} {} .. {}",
        "Logged:".dimmed(),
        format_time(report.first_time),
        format_time(report.last_time)
    );
    println!(
        "   {} {}",
        "Previous:".dimmed(),
        report.previous_archive.as_deref().unwrap_or("(first archive)")
    );
    println!("   {} {}", "Digest:".dimmed(), hex::encode(&report.digest));
    if report.signatures_checked {
        println!("   {} {}", "Tokens:".dimmed(), "Signatures valid".green());
    } else {
        println!(
            "   {} {}",
            "Tokens:".dimmed(),
            "Signatures not checked (no --tsa-cert given)".yellow()
        );
    }
}

fn print_invalid(archive: &Path, err: &LogError) {
    println!();
    println!("{}", "╔════════════════════════════════════════╗".red());
    println!(
        "{}",
        "║               INVALID                  ║".red().bold()
    );
    println!("{}", "╚════════════════════════════════════════╝".red());
    println!();
    println!("   {} {}", "Archive:".dimmed(), display_name(archive));
    println!("   {} {}", "Reason:".dimmed(), err.to_string().red());
}
