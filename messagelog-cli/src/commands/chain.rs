//! Chain command implementation.
//!
//! Verifies a sequence of archives and checks that each one continues the
//! chain of the one before it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use messagelog_core::{verify_archive, LogError, VerifyOptions};
use tracing::info;

use crate::utils::{display_name, load_certificates, parse_digest};

/// Execute the chain command over `archives` in the given order.
pub fn execute(
    archives: Vec<PathBuf>,
    previous_digest: Option<String>,
    tsa_certs: Vec<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let trusted_certificates = load_certificates(&tsa_certs)?;
    let mut previous = previous_digest
        .as_deref()
        .map(|d| parse_digest("--previous-digest", d))
        .transpose()?;
    let mut previous_name: Option<String> = None;

    for path in &archives {
        let options = VerifyOptions {
            previous_digest: previous.take(),
            trusted_certificates: trusted_certificates.clone(),
        };
        let report = verify_archive(path, &options)
            .with_context(|| format!("Chain broken at {}", path.display()))?;

        if let Some(expected) = &previous_name {
            if report.previous_archive.as_deref() != Some(expected.as_str()) {
                return Err(LogError::HashChainInvalid(format!(
                    "{} names {} as its predecessor, expected {}",
                    report.file_name,
                    report.previous_archive.as_deref().unwrap_or("none"),
                    expected
                )))
                .with_context(|| format!("Chain broken at {}", path.display()));
            }
        }

        if !quiet {
            println!(
                "{} {} ({} records, digest {}..)",
                "✓".green(),
                display_name(path),
                report.record_count,
                &hex::encode(&report.digest)[..16]
            );
        }
        previous = Some(report.digest);
        previous_name = Some(report.file_name);
    }

    info!(archives = archives.len(), "Archive chain verified");
    if !quiet {
        println!();
        println!(
            "{} {} archive(s) form an unbroken chain",
            "VALID".green().bold(),
            archives.len()
        );
    }
    Ok(())
}
