//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling scripts and CI systems to handle errors appropriately.

use std::io::ErrorKind;

use messagelog_core::LogError;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Data format error (verification failed, tampered or broken archive).
/// Maps to EX_DATAERR from sysexits.h.
pub const VERIFICATION_FAILED: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// I/O error while reading or writing.
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self {
            code: classify(err),
            message: Some(format!("{err:#}")),
        }
    }
}

/// Classify an error by the first known error type in its chain.
fn classify(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(log_error) = cause.downcast_ref::<LogError>() {
            return match log_error {
                LogError::Io(io) => io_code(io.kind()),
                LogError::HashChainInvalid(_)
                | LogError::InvalidToken(_)
                | LogError::ArchiveFailed(_)
                | LogError::Serialization(_)
                | LogError::RecordNotFound(_) => VERIFICATION_FAILED,
                _ => GENERAL_ERROR,
            };
        }
        if cause.downcast_ref::<hex::FromHexError>().is_some() {
            return USAGE_ERROR;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return io_code(io.kind());
        }
    }
    GENERAL_ERROR
}

fn io_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => INPUT_ERROR,
        _ => IO_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_missing_file_is_input_error() {
        let err = anyhow::Error::from(LogError::Io(std::io::Error::new(
            ErrorKind::NotFound,
            "no such file",
        )))
        .context("Failed to read archive");
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);
    }

    #[test]
    fn test_broken_chain_is_verification_failure() {
        let err = anyhow::Error::from(LogError::HashChainInvalid("seed mismatch".into()));
        let exit = ExitCode::from_anyhow(&err);
        assert_eq!(exit.code, VERIFICATION_FAILED);
        assert!(exit.message.unwrap().contains("seed mismatch"));
    }

    #[test]
    fn test_bad_hex_is_usage_error() {
        let err = hex::decode("zz")
            .context("Invalid --previous-digest")
            .unwrap_err();
        assert_eq!(ExitCode::from_anyhow(&err).code, USAGE_ERROR);
    }

    #[test]
    fn test_unknown_error_is_general() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_anyhow(&err).code, GENERAL_ERROR);
    }
}
