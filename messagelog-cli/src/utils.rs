//! Common utility functions shared across CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use messagelog_core::tsp::load_pem_certificates;
use openssl::x509::X509;
use tracing::debug;

/// Parse a hex-encoded digest given on the command line.
pub fn parse_digest(flag: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim()).with_context(|| format!("Invalid hex digest for {flag}: {value}"))
}

/// Load every certificate from the given PEM files.
pub fn load_certificates(paths: &[PathBuf]) -> Result<Vec<X509>> {
    let mut certificates = Vec::new();
    for path in paths {
        let pem = std::fs::read(path)
            .with_context(|| format!("Failed to read certificate file: {}", path.display()))?;
        let loaded = load_pem_certificates(&pem)
            .with_context(|| format!("Failed to parse certificates in {}", path.display()))?;
        debug!(path = %path.display(), count = loaded.len(), "Loaded TSA certificates");
        certificates.extend(loaded);
    }
    Ok(certificates)
}

/// Format an optional UTC time as a human-readable string.
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".to_string(),
    }
}

/// File name of a path, for messages.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_digest() {
        assert_eq!(parse_digest("--expect-digest", "00ff").unwrap(), vec![0x00, 0xff]);
        assert_eq!(parse_digest("--expect-digest", " 0A0b ").unwrap(), vec![0x0a, 0x0b]);
        assert!(parse_digest("--expect-digest", "xyz").is_err());
    }

    #[test]
    fn test_format_time() {
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 45).unwrap();
        assert_eq!(format_time(Some(t)), "2024-01-15 12:30:45 UTC");
        assert_eq!(format_time(None), "-");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            display_name(Path::new("/var/lib/messagelog/mlog-a.zip")),
            "mlog-a.zip"
        );
    }

    #[test]
    fn test_missing_certificate_file() {
        let err = load_certificates(&[PathBuf::from("/nonexistent/tsa.pem")]).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read certificate file"));
    }
}
