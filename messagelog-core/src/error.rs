use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Store failed: {0}")]
    StoreFailed(String),

    #[error("Timestamping failed: {0}")]
    TimestampFailed(String),

    #[error("Timestamping halted: TSA unavailable since {since}")]
    TimestampingHalted { since: chrono::DateTime<chrono::Utc> },

    #[error("Archiving failed: {0}")]
    ArchiveFailed(String),

    #[error("Hash chain invalid: {0}")]
    HashChainInvalid(String),

    #[error("Message record not found: {0}")]
    RecordNotFound(i64),

    #[error("Invalid timestamp token: {0}")]
    InvalidToken(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message log is shut down")]
    Shutdown,
}

impl From<ciborium::de::Error<std::io::Error>> for LogError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        LogError::Serialization(err.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for LogError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        LogError::Serialization(err.to_string())
    }
}

impl From<zip::result::ZipError> for LogError {
    fn from(err: zip::result::ZipError) -> Self {
        LogError::ArchiveFailed(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for LogError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        LogError::InvalidToken(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
