//! Timestamp token verification.
//!
//! A token is a CMS `SignedData` whose encapsulated content is a DER `TSTInfo`.
//! Signatures are checked with OpenSSL against the configured TSA certificates
//! only; certificates embedded in the token are never trusted on their own.

use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;

use super::der::{self, DerReader};
use super::rfc3161::{TimeStampRequest, TstInfo};
use crate::error::{LogError, Result};

/// id-signedData (1.2.840.113549.1.7.2).
pub const OID_SIGNED_DATA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x07, 0x02];
/// id-ct-TSTInfo (1.2.840.113549.1.9.16.1.4).
pub const OID_TST_INFO: &[u8] = &[
    0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x10, 0x01, 0x04,
];

/// Parse the `TSTInfo` of a token without checking its signature.
pub fn decode_token(token: &[u8]) -> Result<TstInfo> {
    TstInfo::from_der(&encapsulated_content(token)?)
}

/// Verify the token signature against `trusted` and return its `TSTInfo`.
pub fn verify_token(token: &[u8], trusted: &[X509]) -> Result<TstInfo> {
    if trusted.is_empty() {
        return Err(LogError::InvalidToken(
            "no trusted TSA certificates configured".to_string(),
        ));
    }

    // Rejects tokens whose content is not a TSTInfo before OpenSSL sees them.
    encapsulated_content(token)?;

    let mut cms = CmsContentInfo::from_der(token)?;
    let mut certs = Stack::new()?;
    for cert in trusted {
        certs.push(cert.clone())?;
    }
    let store = X509StoreBuilder::new()?.build();

    let mut content = Vec::new();
    cms.verify(
        Some(&*certs),
        Some(&*store),
        None,
        Some(&mut content),
        CMSOptions::NOINTERN | CMSOptions::NO_SIGNER_CERT_VERIFY | CMSOptions::BINARY,
    )
    .map_err(|e| LogError::InvalidToken(format!("token signature not verified: {e}")))?;

    TstInfo::from_der(&content)
}

/// Verify a freshly received token against the request it answers.
pub fn verify_response_token(
    token: &[u8],
    request: &TimeStampRequest,
    trusted: &[X509],
) -> Result<TstInfo> {
    let info = verify_token(token, trusted)?;
    info.matches_request(request)?;
    Ok(info)
}

/// Load every certificate from a PEM bundle.
pub fn load_pem_certificates(pem: &[u8]) -> Result<Vec<X509>> {
    let certs = X509::stack_from_pem(pem)?;
    if certs.is_empty() {
        return Err(LogError::InvalidToken(
            "PEM bundle contains no certificates".to_string(),
        ));
    }
    Ok(certs)
}

// ContentInfo ::= SEQUENCE { contentType, [0] EXPLICIT SignedData }
// SignedData ::= SEQUENCE { version, digestAlgorithms SET, encapContentInfo, ... }
// EncapsulatedContentInfo ::= SEQUENCE { eContentType, [0] EXPLICIT OCTET STRING }
fn encapsulated_content(token: &[u8]) -> Result<Vec<u8>> {
    let mut outer = DerReader::new(token);
    let content_info = outer.expect(der::TAG_SEQUENCE)?;
    let mut ci = content_info.reader();
    if ci.expect(der::TAG_OID)?.content != OID_SIGNED_DATA {
        return Err(LogError::InvalidToken(
            "token is not a CMS SignedData".to_string(),
        ));
    }
    let explicit = ci.expect(der::TAG_CONTEXT_0)?;
    let signed_data = explicit.reader().expect(der::TAG_SEQUENCE)?;

    let mut sd = signed_data.reader();
    sd.expect(der::TAG_INTEGER)?;
    sd.expect(der::TAG_SET)?;
    let encap = sd.expect(der::TAG_SEQUENCE)?;

    let mut ec = encap.reader();
    if ec.expect(der::TAG_OID)?.content != OID_TST_INFO {
        return Err(LogError::InvalidToken(
            "token content type is not id-ct-TSTInfo".to_string(),
        ));
    }
    let wrapped = ec
        .read_optional(der::TAG_CONTEXT_0)?
        .ok_or_else(|| LogError::InvalidToken("token has no encapsulated content".to_string()))?;
    let octets = wrapped.reader().expect(der::TAG_OCTET_STRING)?;
    Ok(octets.content.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashchain::HashAlgorithm;
    use crate::tsp::mock::{generate_tsa_certificate, MockTsa};

    #[test]
    fn test_verify_mock_token() {
        let tsa = MockTsa::new().unwrap();
        let alg = HashAlgorithm::Sha256;
        let request = TimeStampRequest::new(alg, alg.digest(b"batch result"));

        let token = tsa.issue_token(&request).unwrap();
        let info = verify_response_token(&token, &request, &[tsa.certificate().clone()]).unwrap();
        assert_eq!(info.digest, request.digest);
        assert_eq!(info.nonce.as_deref(), Some(request.nonce.as_slice()));

        let decoded = decode_token(&token).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_untrusted_signer_rejected() {
        let tsa = MockTsa::new().unwrap();
        let other = MockTsa::new().unwrap();
        let alg = HashAlgorithm::Sha256;
        let request = TimeStampRequest::new(alg, alg.digest(b"batch"));
        let token = tsa.issue_token(&request).unwrap();

        let err = verify_token(&token, &[other.certificate().clone()]).unwrap_err();
        assert!(matches!(err, LogError::InvalidToken(_)));
        assert!(verify_token(&token, &[]).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let tsa = MockTsa::new().unwrap();
        let alg = HashAlgorithm::Sha256;
        let request = TimeStampRequest::new(alg, alg.digest(b"batch"));
        let mut token = tsa.issue_token(&request).unwrap();

        let digest_pos = token
            .windows(request.digest.len())
            .position(|w| w == request.digest.as_slice())
            .unwrap();
        token[digest_pos] ^= 0x01;
        assert!(verify_token(&token, &[tsa.certificate().clone()]).is_err());
    }

    #[test]
    fn test_token_for_other_request_rejected() {
        let tsa = MockTsa::new().unwrap();
        let alg = HashAlgorithm::Sha256;
        let request = TimeStampRequest::new(alg, alg.digest(b"one"));
        let other = TimeStampRequest::new(alg, alg.digest(b"two"));
        let token = tsa.issue_token(&request).unwrap();

        let err = verify_response_token(&token, &other, &[tsa.certificate().clone()]).unwrap_err();
        assert!(matches!(err, LogError::InvalidToken(_)));
    }

    #[test]
    fn test_data_content_type_rejected() {
        let (key, cert) = generate_tsa_certificate().unwrap();
        let alg = HashAlgorithm::Sha256;
        let info = TstInfo {
            policy: vec![0x2A, 0x03],
            algorithm: alg,
            digest: alg.digest(b"batch"),
            serial_number: vec![0x01],
            gen_time: chrono::Utc::now(),
            nonce: None,
        };
        // A plain CMS signature carries id-data, not id-ct-TSTInfo.
        let token = CmsContentInfo::sign(
            Some(&cert),
            Some(&key),
            None,
            Some(&info.to_der()),
            CMSOptions::BINARY,
        )
        .unwrap()
        .to_der()
        .unwrap();

        assert!(matches!(decode_token(&token), Err(LogError::InvalidToken(_))));
        assert!(matches!(verify_token(&token, &[cert]), Err(LogError::InvalidToken(_))));
    }

    #[test]
    fn test_mock_token_content_type() {
        let tsa = MockTsa::new().unwrap();
        let alg = HashAlgorithm::Sha256;
        let token = tsa
            .issue_token(&TimeStampRequest::new(alg, alg.digest(b"batch")))
            .unwrap();
        let needle = der::oid(OID_TST_INFO);
        assert!(token.windows(needle.len()).any(|w| w == needle.as_slice()));
    }

    #[test]
    fn test_pem_bundle_loading() {
        let tsa = MockTsa::new().unwrap();
        let pem = tsa.certificate().to_pem().unwrap();
        assert_eq!(load_pem_certificates(&pem).unwrap().len(), 1);
        assert!(load_pem_certificates(b"not pem").is_err());
    }
}
