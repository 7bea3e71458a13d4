//! Message log configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::error::LogError;
use crate::hashchain::HashAlgorithm;

/// How a halted log resumes accepting messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HaltPolicy {
    /// Only an explicit reset clears the halt.
    Manual,
    /// The next successful timestamp clears the halt.
    #[default]
    ResumeOnSuccess,
    /// The halt expires after the given time and the failure window restarts.
    Cooldown(Duration),
}

impl FromStr for HaltPolicy {
    type Err = LogError;

    /// Parses `manual`, `resume-on-success` or `cooldown:<seconds>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "manual" => Ok(HaltPolicy::Manual),
            "resume-on-success" | "resume_on_success" => Ok(HaltPolicy::ResumeOnSuccess),
            other => other
                .strip_prefix("cooldown:")
                .and_then(|secs| secs.parse().ok())
                .map(|secs| HaltPolicy::Cooldown(Duration::from_secs(secs)))
                .ok_or_else(|| LogError::Serialization(format!("invalid halt policy: {other}"))),
        }
    }
}

/// Configuration of one message log instance.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Timestamp every record inside `log()` before returning (default: false)
    pub timestamp_immediately: bool,
    /// How long timestamping may keep failing before `log()` is refused
    /// (default: 4 hours, zero disables the breaker)
    pub acceptable_timestamp_failure_period: Duration,
    /// Retention of archived records (default: 30 days)
    pub keep_records_for: Duration,
    /// Upper bound of one archive file in bytes (default: 32 MiB)
    pub archive_max_size: usize,
    /// Digest algorithm for message hashes and chains (default: SHA-256)
    pub hash_algorithm: HashAlgorithm,
    /// Records per TSA request (default: 1000)
    pub timestamp_records_limit: usize,
    /// Period of the deferred timestamping trigger (default: 60 s)
    pub timestamp_interval: Duration,
    /// Delay before a failed batch is retried (default: 60 s, zero disables)
    pub timestamp_retry_delay: Duration,
    /// Period of the archiving trigger (default: 6 h)
    pub archive_interval: Duration,
    /// Period of the cleaning trigger (default: 12 h)
    pub clean_interval: Duration,
    pub halt_policy: HaltPolicy,
    /// Shell command run after every pass that wrote archives
    pub archive_transfer_command: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            timestamp_immediately: false,
            acceptable_timestamp_failure_period: Duration::from_secs(14_400),
            keep_records_for: Duration::from_secs(30 * 24 * 3600),
            archive_max_size: 32 * 1024 * 1024,
            hash_algorithm: HashAlgorithm::Sha256,
            timestamp_records_limit: 1000,
            timestamp_interval: Duration::from_secs(60),
            timestamp_retry_delay: Duration::from_secs(60),
            archive_interval: Duration::from_secs(6 * 3600),
            clean_interval: Duration::from_secs(12 * 3600),
            halt_policy: HaltPolicy::ResumeOnSuccess,
            archive_transfer_command: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from `MESSAGELOG_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let timestamp_immediately = std::env::var("MESSAGELOG_TIMESTAMP_IMMEDIATELY")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(defaults.timestamp_immediately);

        let acceptable_timestamp_failure_period = env_secs(
            "MESSAGELOG_ACCEPTABLE_TIMESTAMP_FAILURE_PERIOD",
            defaults.acceptable_timestamp_failure_period,
        );

        let keep_records_for = std::env::var("MESSAGELOG_KEEP_RECORDS_FOR_DAYS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|days| Duration::from_secs(days * 24 * 3600))
            .unwrap_or(defaults.keep_records_for);

        let archive_max_size = std::env::var("MESSAGELOG_ARCHIVE_MAX_FILESIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.archive_max_size);

        let hash_algorithm = std::env::var("MESSAGELOG_HASH_ALGORITHM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.hash_algorithm);

        let timestamp_records_limit = std::env::var("MESSAGELOG_TIMESTAMP_RECORDS_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(defaults.timestamp_records_limit);

        let halt_policy = std::env::var("MESSAGELOG_HALT_POLICY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.halt_policy);

        let archive_transfer_command = std::env::var("MESSAGELOG_ARCHIVE_TRANSFER_COMMAND")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Self {
            timestamp_immediately,
            acceptable_timestamp_failure_period,
            keep_records_for,
            archive_max_size,
            hash_algorithm,
            timestamp_records_limit,
            timestamp_interval: env_secs("MESSAGELOG_TIMESTAMP_INTERVAL", defaults.timestamp_interval),
            timestamp_retry_delay: env_secs(
                "MESSAGELOG_TIMESTAMP_RETRY_DELAY",
                defaults.timestamp_retry_delay,
            ),
            archive_interval: env_secs("MESSAGELOG_ARCHIVE_INTERVAL", defaults.archive_interval),
            clean_interval: env_secs("MESSAGELOG_CLEAN_INTERVAL", defaults.clean_interval),
            halt_policy,
            archive_transfer_command,
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert!(!config.timestamp_immediately);
        assert_eq!(config.acceptable_timestamp_failure_period, Duration::from_secs(14_400));
        assert_eq!(config.keep_records_for, Duration::from_secs(2_592_000));
        assert_eq!(config.archive_max_size, 33_554_432);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.halt_policy, HaltPolicy::ResumeOnSuccess);
        assert_eq!(config.timestamp_retry_delay, Duration::from_secs(60));
        assert!(config.archive_transfer_command.is_none());
    }

    #[test]
    fn test_from_env_reads_retry_delay_and_transfer_command() {
        std::env::set_var("MESSAGELOG_TIMESTAMP_RETRY_DELAY", "15");
        std::env::set_var("MESSAGELOG_ARCHIVE_TRANSFER_COMMAND", "  rsync -a /var/lib/mlog/ backup:  ");
        let config = LogConfig::from_env();
        std::env::remove_var("MESSAGELOG_TIMESTAMP_RETRY_DELAY");
        std::env::remove_var("MESSAGELOG_ARCHIVE_TRANSFER_COMMAND");

        assert_eq!(config.timestamp_retry_delay, Duration::from_secs(15));
        assert_eq!(
            config.archive_transfer_command.as_deref(),
            Some("rsync -a /var/lib/mlog/ backup:")
        );
    }

    #[test]
    fn test_halt_policy_parsing() {
        assert_eq!("manual".parse::<HaltPolicy>().unwrap(), HaltPolicy::Manual);
        assert_eq!(
            "Resume-On-Success".parse::<HaltPolicy>().unwrap(),
            HaltPolicy::ResumeOnSuccess
        );
        assert_eq!(
            "cooldown:600".parse::<HaltPolicy>().unwrap(),
            HaltPolicy::Cooldown(Duration::from_secs(600))
        );
        assert!("cooldown:soon".parse::<HaltPolicy>().is_err());
        assert!("never".parse::<HaltPolicy>().is_err());
    }
}
