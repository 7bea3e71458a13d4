//! In-process time-stamping authority for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509};

use super::der;
use super::rfc3161::{PkiStatus, TimeStampRequest, TimeStampResponse, TstInfo};
use super::verify::{OID_SIGNED_DATA, OID_TST_INFO};
use crate::error::{LogError, Result};
use crate::hashchain::HashAlgorithm;

/// Policy OID of tokens issued by the mock (1.3.6.1.4.1.99999.1).
const MOCK_POLICY: &[u8] = &[0x2B, 0x06, 0x01, 0x04, 0x01, 0x86, 0x8D, 0x1F, 0x01];
const OID_CONTENT_TYPE: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x03];
const OID_MESSAGE_DIGEST: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x04];
const OID_ECDSA_SHA256: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02];

/// Mock TSA issuing genuine CMS-signed RFC 3161 tokens from a throwaway
/// self-signed certificate.
/// WARNING: Do not use in production - the signing key lives in memory only!
pub struct MockTsa {
    key: PKey<Private>,
    cert: X509,
    failing: AtomicBool,
    failing_urls: Mutex<HashSet<String>>,
    serial: AtomicU64,
    requests: AtomicUsize,
}

impl MockTsa {
    pub fn new() -> Result<Self> {
        let (key, cert) = generate_tsa_certificate()?;
        Ok(Self {
            key,
            cert,
            failing: AtomicBool::new(false),
            failing_urls: Mutex::new(HashSet::new()),
            serial: AtomicU64::new(1),
            requests: AtomicUsize::new(0),
        })
    }

    pub fn certificate(&self) -> &X509 {
        &self.cert
    }

    pub fn certificate_pem(&self) -> Result<Vec<u8>> {
        Ok(self.cert.to_pem()?)
    }

    /// Make every request fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make requests to one URL fail.
    pub fn fail_url(&self, url: &str) {
        if let Ok(mut urls) = self.failing_urls.lock() {
            urls.insert(url.to_string());
        }
    }

    /// Number of requests received, failed ones included.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Sign a `TSTInfo` answering `request`.
    pub fn issue_token(&self, request: &TimeStampRequest) -> Result<Vec<u8>> {
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);
        let info = TstInfo {
            policy: MOCK_POLICY.to_vec(),
            algorithm: request.algorithm,
            digest: request.digest.clone(),
            serial_number: serial.to_be_bytes().to_vec(),
            gen_time: Utc::now(),
            nonce: (!request.nonce.is_empty()).then(|| request.nonce.clone()),
        };
        sign_tst_info(&self.key, &self.cert, &info.to_der())
    }

    /// Answer a DER `TimeStampReq` sent to `url` the way a TSA would.
    pub fn respond(&self, url: &str, request_der: &[u8]) -> Result<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.is_failing(url) {
            return Err(LogError::TimestampFailed(format!(
                "mock TSA at {url} is unavailable"
            )));
        }
        let request = TimeStampRequest::from_der(request_der)?;
        let response = TimeStampResponse {
            status: PkiStatus::Granted,
            status_text: Vec::new(),
            token: Some(self.issue_token(&request)?),
        };
        Ok(response.to_der())
    }

    fn is_failing(&self, url: &str) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.failing_urls
            .lock()
            .map(|urls| urls.contains(url))
            .unwrap_or(false)
    }
}

/// Wrap a DER `TSTInfo` in a CMS `SignedData` with eContentType id-ct-TSTInfo.
///
/// The signed attributes carry the content type and the SHA-256 digest of the
/// content, in DER order.
fn sign_tst_info(key: &PKey<Private>, cert: &X509, tst_info: &[u8]) -> Result<Vec<u8>> {
    let sha256 = der::sequence(&[der::oid(HashAlgorithm::Sha256.oid())]);

    let attributes = [
        der::sequence(&[
            der::oid(OID_CONTENT_TYPE),
            der::set(&[der::oid(OID_TST_INFO)]),
        ]),
        der::sequence(&[
            der::oid(OID_MESSAGE_DIGEST),
            der::set(&[der::octet_string(&HashAlgorithm::Sha256.digest(tst_info))]),
        ]),
    ];
    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(&der::set(&attributes))?;
    let signature = signer.sign_to_vec()?;

    let serial = cert.serial_number().to_bn()?.to_vec();
    let signer_info = der::sequence(&[
        der::small_integer(1),
        der::sequence(&[cert.issuer_name().to_der()?, der::unsigned_integer(&serial)]),
        sha256.clone(),
        der::tlv(der::TAG_CONTEXT_0, &attributes.concat()),
        der::sequence(&[der::oid(OID_ECDSA_SHA256)]),
        der::octet_string(&signature),
    ]);

    let signed_data = der::sequence(&[
        der::small_integer(3),
        der::set(&[sha256]),
        der::sequence(&[
            der::oid(OID_TST_INFO),
            der::tlv(der::TAG_CONTEXT_0, &der::octet_string(tst_info)),
        ]),
        der::tlv(der::TAG_CONTEXT_0, &cert.to_der()?),
        der::set(&[signer_info]),
    ]);
    Ok(der::sequence(&[
        der::oid(OID_SIGNED_DATA),
        der::tlv(der::TAG_CONTEXT_0, &signed_data),
    ]))
}

pub(crate) fn generate_tsa_certificate() -> Result<(PKey<Private>, X509)> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("C", "EE")?;
    name.append_entry_by_text("O", "Message Log Test")?;
    name.append_entry_by_text("CN", "Message Log Test TSA")?;
    let name = name.build();
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;

    let not_before: Asn1Time = Asn1Time::days_from_now(0)?;
    let not_after: Asn1Time = Asn1Time::days_from_now(365)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.set_pubkey(&key)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .digital_signature()
            .build()?,
    )?;
    builder.append_extension(ExtendedKeyUsage::new().critical().time_stamping().build()?)?;

    builder.sign(&key, MessageDigest::sha256())?;
    Ok((key, builder.build()))
}

#[cfg(feature = "network")]
mod network_impl {
    use async_trait::async_trait;

    use super::MockTsa;
    use crate::error::Result;
    use crate::tsp::rfc3161::TimeStampResponse;
    use crate::tsp::TsaClient;

    #[async_trait]
    impl TsaClient for MockTsa {
        async fn request(&self, url: &str, request_der: &[u8]) -> Result<Vec<u8>> {
            let response = self.respond(url, request_der)?;
            TimeStampResponse::from_der(&response)?.into_token()
        }
    }
}
