//! Time-Stamping Authority protocol (RFC 3161).
//!
//! - [`rfc3161`] encodes requests and decodes responses and `TSTInfo`
//! - [`verify`] checks token signatures against trusted TSA certificates
//! - [`TsaClient`] performs the round trip; [`HttpTsaClient`] talks HTTP,
//!   [`MockTsa`] signs tokens in process for tests
//! - [`TimestampingServices`] supplies the TSA URL list and trust anchors,
//!   read again for every batch so configuration can change at runtime

pub mod der;
pub mod mock;
pub mod rfc3161;
pub mod verify;

#[cfg(feature = "network")]
mod http_client;

#[cfg(feature = "network")]
pub use http_client::{HttpTsaClient, TsaHttpConfig};
pub use mock::MockTsa;
pub use rfc3161::{PkiStatus, TimeStampRequest, TimeStampResponse, TstInfo};
pub use verify::{decode_token, load_pem_certificates, verify_response_token, verify_token};

use std::sync::RwLock;

use openssl::x509::X509;

#[cfg(feature = "network")]
use async_trait::async_trait;

#[cfg(feature = "network")]
use crate::error::Result;

/// Performs the network round trip to a TSA.
///
/// Implementations return the DER `TimeStampToken` of a granted response and
/// must report every other outcome (transport error, timeout, refusal) as an error.
#[cfg(feature = "network")]
#[async_trait]
pub trait TsaClient: Send + Sync {
    async fn request(&self, url: &str, request_der: &[u8]) -> Result<Vec<u8>>;
}

/// Source of TSA URLs and trusted TSA certificates.
pub trait TimestampingServices: Send + Sync {
    /// TSA URLs in the order they should be tried.
    fn urls(&self) -> Vec<String>;

    fn trusted_certificates(&self) -> Vec<X509>;
}

/// In-process timestamping configuration that can be replaced at runtime.
#[derive(Default)]
pub struct StaticTimestampingServices {
    urls: RwLock<Vec<String>>,
    certificates: RwLock<Vec<X509>>,
}

impl StaticTimestampingServices {
    pub fn new(urls: Vec<String>, certificates: Vec<X509>) -> Self {
        Self {
            urls: RwLock::new(urls),
            certificates: RwLock::new(certificates),
        }
    }

    pub fn set_urls(&self, urls: Vec<String>) {
        *self.urls.write().unwrap_or_else(|e| e.into_inner()) = urls;
    }

    pub fn set_trusted_certificates(&self, certificates: Vec<X509>) {
        *self.certificates.write().unwrap_or_else(|e| e.into_inner()) = certificates;
    }
}

impl TimestampingServices for StaticTimestampingServices {
    fn urls(&self) -> Vec<String> {
        self.urls.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn trusted_certificates(&self) -> Vec<X509> {
        self.certificates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for StaticTimestampingServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTimestampingServices")
            .field("urls", &self.urls())
            .field("certificates", &self.trusted_certificates().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_services_hot_reload() {
        let services = StaticTimestampingServices::new(vec!["http://a.test".to_string()], vec![]);
        assert_eq!(services.urls(), vec!["http://a.test".to_string()]);

        services.set_urls(vec!["http://b.test".to_string(), "http://c.test".to_string()]);
        assert_eq!(services.urls().len(), 2);

        let tsa = MockTsa::new().unwrap();
        services.set_trusted_certificates(vec![tsa.certificate().clone()]);
        assert_eq!(services.trusted_certificates().len(), 1);
    }
}
