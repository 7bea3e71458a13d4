//! RFC 3161 time-stamp protocol messages.

use chrono::{DateTime, Utc};

use super::der::{self, DerReader};
use crate::error::{LogError, Result};
use crate::hashchain::HashAlgorithm;

/// A time-stamp request for one digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeStampRequest {
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
    pub nonce: Vec<u8>,
    pub cert_req: bool,
}

impl TimeStampRequest {
    /// Request a timestamp over `digest` with a fresh random nonce.
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Self {
        let random = uuid::Uuid::new_v4();
        // Keep the nonce positive and free of leading zeros so it compares byte for byte.
        let mut nonce = random.as_bytes()[..8].to_vec();
        nonce[0] = (nonce[0] & 0x7F) | 0x40;
        Self {
            algorithm,
            digest,
            nonce,
            cert_req: true,
        }
    }

    pub fn to_der(&self) -> Vec<u8> {
        der::sequence(&[
            der::small_integer(1),
            message_imprint(self.algorithm, &self.digest),
            der::unsigned_integer(&self.nonce),
            der::boolean(self.cert_req),
        ])
    }

    pub fn from_der(data: &[u8]) -> Result<Self> {
        let mut outer = DerReader::new(data);
        let req = outer.expect(der::TAG_SEQUENCE)?;
        let mut fields = req.reader();
        let version = fields.expect(der::TAG_INTEGER)?.as_u64()?;
        if version != 1 {
            return Err(LogError::InvalidToken(format!(
                "unsupported request version {version}"
            )));
        }
        let (algorithm, digest) = parse_message_imprint(&mut fields)?;
        fields.read_optional(der::TAG_OID)?;
        let nonce = fields
            .read_optional(der::TAG_INTEGER)?
            .map(|n| n.as_unsigned_integer().map(<[u8]>::to_vec))
            .transpose()?
            .unwrap_or_default();
        let cert_req = fields
            .read_optional(der::TAG_BOOLEAN)?
            .map(|b| b.as_bool())
            .transpose()?
            .unwrap_or(false);
        Ok(Self {
            algorithm,
            digest,
            nonce,
            cert_req,
        })
    }
}

/// `MessageImprint ::= SEQUENCE { hashAlgorithm AlgorithmIdentifier, hashedMessage OCTET STRING }`
pub fn message_imprint(algorithm: HashAlgorithm, digest: &[u8]) -> Vec<u8> {
    der::sequence(&[
        der::sequence(&[der::oid(algorithm.oid()), der::null()]),
        der::octet_string(digest),
    ])
}

fn parse_message_imprint(reader: &mut DerReader<'_>) -> Result<(HashAlgorithm, Vec<u8>)> {
    let imprint = reader.expect(der::TAG_SEQUENCE)?;
    let mut fields = imprint.reader();
    let alg_id = fields.expect(der::TAG_SEQUENCE)?;
    let oid = alg_id.reader().expect(der::TAG_OID)?;
    let algorithm = HashAlgorithm::from_oid(oid.content).ok_or_else(|| {
        LogError::InvalidToken(format!(
            "unsupported imprint algorithm {}",
            hex::encode(oid.content)
        ))
    })?;
    let digest = fields.expect(der::TAG_OCTET_STRING)?.content.to_vec();
    Ok((algorithm, digest))
}

/// PKIStatus values of a time-stamp response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    Granted,
    GrantedWithMods,
    Rejection,
    Waiting,
    RevocationWarning,
    RevocationNotification,
    Unknown(u64),
}

impl PkiStatus {
    fn from_code(code: u64) -> Self {
        match code {
            0 => PkiStatus::Granted,
            1 => PkiStatus::GrantedWithMods,
            2 => PkiStatus::Rejection,
            3 => PkiStatus::Waiting,
            4 => PkiStatus::RevocationWarning,
            5 => PkiStatus::RevocationNotification,
            other => PkiStatus::Unknown(other),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            PkiStatus::Granted => 0,
            PkiStatus::GrantedWithMods => 1,
            PkiStatus::Rejection => 2,
            PkiStatus::Waiting => 3,
            PkiStatus::RevocationWarning => 4,
            PkiStatus::RevocationNotification => 5,
            PkiStatus::Unknown(code) => *code,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, PkiStatus::Granted | PkiStatus::GrantedWithMods)
    }
}

/// A parsed `TimeStampResp`.
#[derive(Debug, Clone)]
pub struct TimeStampResponse {
    pub status: PkiStatus,
    pub status_text: Vec<String>,
    /// DER-encoded `TimeStampToken` (a CMS ContentInfo).
    pub token: Option<Vec<u8>>,
}

impl TimeStampResponse {
    pub fn from_der(data: &[u8]) -> Result<Self> {
        let mut outer = DerReader::new(data);
        let resp = outer.expect(der::TAG_SEQUENCE)?;
        let mut fields = resp.reader();

        let status_info = fields.expect(der::TAG_SEQUENCE)?;
        let mut status_fields = status_info.reader();
        let status = PkiStatus::from_code(status_fields.expect(der::TAG_INTEGER)?.as_u64()?);
        let mut status_text = Vec::new();
        if let Some(text) = status_fields.read_optional(der::TAG_SEQUENCE)? {
            let mut strings = text.reader();
            while !strings.is_empty() {
                status_text.push(strings.read()?.as_utf8()?.to_string());
            }
        }

        let token = fields
            .read_optional(der::TAG_SEQUENCE)?
            .map(|t| t.raw.to_vec());
        Ok(Self {
            status,
            status_text,
            token,
        })
    }

    pub fn to_der(&self) -> Vec<u8> {
        let mut status_info = vec![der::small_integer(self.status.code())];
        if !self.status_text.is_empty() {
            let strings: Vec<Vec<u8>> = self
                .status_text
                .iter()
                .map(|s| der::tlv(der::TAG_UTF8_STRING, s.as_bytes()))
                .collect();
            status_info.push(der::sequence(&strings));
        }
        let mut parts = vec![der::sequence(&status_info)];
        if let Some(token) = &self.token {
            parts.push(token.clone());
        }
        der::sequence(&parts)
    }

    /// The token of a granted response; any other status is a timestamping failure.
    pub fn into_token(self) -> Result<Vec<u8>> {
        if !self.status.is_granted() {
            let text = if self.status_text.is_empty() {
                String::new()
            } else {
                format!(": {}", self.status_text.join("; "))
            };
            return Err(LogError::TimestampFailed(format!(
                "TSA refused request with status {:?}{text}",
                self.status
            )));
        }
        self.token.ok_or_else(|| {
            LogError::TimestampFailed("granted response carries no timestamp token".to_string())
        })
    }
}

/// The signed content of a timestamp token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TstInfo {
    pub policy: Vec<u8>,
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
    pub serial_number: Vec<u8>,
    pub gen_time: DateTime<Utc>,
    pub nonce: Option<Vec<u8>>,
}

impl TstInfo {
    pub fn from_der(data: &[u8]) -> Result<Self> {
        let mut outer = DerReader::new(data);
        let info = outer.expect(der::TAG_SEQUENCE)?;
        let mut fields = info.reader();

        let version = fields.expect(der::TAG_INTEGER)?.as_u64()?;
        if version != 1 {
            return Err(LogError::InvalidToken(format!(
                "unsupported TSTInfo version {version}"
            )));
        }
        let policy = fields.expect(der::TAG_OID)?.content.to_vec();
        let (algorithm, digest) = parse_message_imprint(&mut fields)?;
        let serial_number = fields
            .expect(der::TAG_INTEGER)?
            .as_unsigned_integer()?
            .to_vec();
        let gen_time = fields
            .expect(der::TAG_GENERALIZED_TIME)?
            .as_generalized_time()?;
        // accuracy, ordering
        fields.read_optional(der::TAG_SEQUENCE)?;
        fields.read_optional(der::TAG_BOOLEAN)?;
        let nonce = fields
            .read_optional(der::TAG_INTEGER)?
            .map(|n| n.as_unsigned_integer().map(<[u8]>::to_vec))
            .transpose()?;

        Ok(Self {
            policy,
            algorithm,
            digest,
            serial_number,
            gen_time,
            nonce,
        })
    }

    pub fn to_der(&self) -> Vec<u8> {
        let mut parts = vec![
            der::small_integer(1),
            der::oid(&self.policy),
            message_imprint(self.algorithm, &self.digest),
            der::unsigned_integer(&self.serial_number),
            der::generalized_time(self.gen_time),
        ];
        if let Some(nonce) = &self.nonce {
            parts.push(der::unsigned_integer(nonce));
        }
        der::sequence(&parts)
    }

    /// Check that this token answers `request`.
    pub fn matches_request(&self, request: &TimeStampRequest) -> Result<()> {
        if self.algorithm != request.algorithm || self.digest != request.digest {
            return Err(LogError::InvalidToken(
                "token message imprint does not match the request".to_string(),
            ));
        }
        if let Some(nonce) = &self.nonce {
            if *nonce != request.nonce {
                return Err(LogError::InvalidToken(
                    "token nonce does not match the request".to_string(),
                ));
            }
        }
        Ok(())
    }
}
