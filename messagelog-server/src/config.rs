//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use messagelog_core::messagelog::LogConfig;
use messagelog_core::tsp::TsaHttpConfig;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Database connection pool minimum connections (default: 2)
    pub database_min_connections: u32,
    /// Directory receiving archive files (default: ./archives)
    pub archive_path: PathBuf,
    /// TSA URLs in fallback order
    pub tsa_urls: Vec<String>,
    /// PEM bundle with the trusted TSA certificates
    pub tsa_certs_path: Option<PathBuf>,
    /// Timeout of a single TSA request in seconds (default: 20)
    pub tsa_timeout_secs: u64,
    /// Retries of a TSA request on transient errors (default: 2)
    pub tsa_max_retries: u32,
    /// Message log engine settings
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            timeout_secs: 30,
            database_url: None,
            database_max_connections: 20,
            database_min_connections: 2,
            archive_path: PathBuf::from("archives"),
            tsa_urls: Vec::new(),
            tsa_certs_path: None,
            tsa_timeout_secs: 20,
            tsa_max_retries: 2,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or([127, 0, 0, 1]);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|origins| split_list(&origins));

        let timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let database_max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let database_min_connections = std::env::var("DATABASE_MIN_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        let archive_path = std::env::var("MESSAGELOG_ARCHIVE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("archives"));

        let tsa_urls = std::env::var("TSA_URLS")
            .map(|urls| split_list(&urls))
            .unwrap_or_default();

        let tsa_certs_path = std::env::var("TSA_CERTS").ok().map(PathBuf::from);

        let tsa_timeout_secs = std::env::var("TSA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let tsa_max_retries = std::env::var("TSA_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);

        Self {
            port,
            host,
            allowed_origins,
            timeout_secs,
            database_url,
            database_max_connections,
            database_min_connections,
            archive_path,
            tsa_urls,
            tsa_certs_path,
            tsa_timeout_secs,
            tsa_max_retries,
            log: LogConfig::from_env(),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    /// Settings of the HTTP client used for TSA requests
    pub fn tsa_http_config(&self) -> TsaHttpConfig {
        TsaHttpConfig {
            timeout: Duration::from_secs(self.tsa_timeout_secs),
            max_retries: self.tsa_max_retries,
            ..TsaHttpConfig::default()
        }
    }
}

/// Split a comma-separated list, dropping blank entries.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
        assert!(config.tsa_urls.is_empty());
        assert!(!config.log.timestamp_immediately);
    }

    #[test]
    fn test_split_list_trims_and_skips_blanks() {
        assert_eq!(
            split_list(" http://tsa1.test , ,http://tsa2.test,"),
            vec!["http://tsa1.test", "http://tsa2.test"]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_socket_addr() {
        let config = Config {
            port: 8080,
            host: [0, 0, 0, 0],
            ..Config::default()
        };
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8080");
    }

    #[test]
    fn test_tsa_http_config() {
        let config = Config {
            tsa_timeout_secs: 5,
            tsa_max_retries: 0,
            ..Config::default()
        };
        let http = config.tsa_http_config();
        assert_eq!(http.timeout, Duration::from_secs(5));
        assert_eq!(http.max_retries, 0);
    }
}
