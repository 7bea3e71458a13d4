//! Minimal DER reader and writer, enough for RFC 3161 requests, responses and TSTInfo.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{LogError, Result};

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_UTF8_STRING: u8 = 0x0C;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
pub const TAG_CONTEXT_0: u8 = 0xA0;

fn malformed(msg: impl Into<String>) -> LogError {
    LogError::InvalidToken(format!("malformed DER: {}", msg.into()))
}

// === Writer ===

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

pub fn sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, &parts.concat())
}

pub fn set(parts: &[Vec<u8>]) -> Vec<u8> {
    tlv(TAG_SET, &parts.concat())
}

/// INTEGER from unsigned big-endian magnitude.
pub fn unsigned_integer(magnitude: &[u8]) -> Vec<u8> {
    let trimmed = strip_leading_zeros(magnitude);
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.is_empty() || trimmed[0] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(trimmed);
    tlv(TAG_INTEGER, &content)
}

pub fn small_integer(value: u64) -> Vec<u8> {
    unsigned_integer(&value.to_be_bytes())
}

pub fn boolean(value: bool) -> Vec<u8> {
    tlv(TAG_BOOLEAN, &[if value { 0xFF } else { 0x00 }])
}

pub fn null() -> Vec<u8> {
    tlv(TAG_NULL, &[])
}

pub fn oid(content: &[u8]) -> Vec<u8> {
    tlv(TAG_OID, content)
}

pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, content)
}

pub fn generalized_time(time: DateTime<Utc>) -> Vec<u8> {
    tlv(
        TAG_GENERALIZED_TIME,
        time.format("%Y%m%d%H%M%SZ").to_string().as_bytes(),
    )
}

// === Reader ===

/// One decoded tag-length-value element.
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
    /// Complete encoding including tag and length.
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    pub fn reader(&self) -> DerReader<'a> {
        DerReader::new(self.content)
    }

    pub fn as_unsigned_integer(&self) -> Result<&'a [u8]> {
        self.check(TAG_INTEGER)?;
        if self.content.is_empty() {
            return Err(malformed("empty INTEGER"));
        }
        Ok(strip_leading_zeros(self.content))
    }

    pub fn as_u64(&self) -> Result<u64> {
        let magnitude = self.as_unsigned_integer()?;
        if magnitude.len() > 8 {
            return Err(malformed("INTEGER does not fit in 64 bits"));
        }
        Ok(magnitude.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.check(TAG_BOOLEAN)?;
        match self.content {
            [0x00] => Ok(false),
            [_] => Ok(true),
            _ => Err(malformed("BOOLEAN must be one byte")),
        }
    }

    pub fn as_generalized_time(&self) -> Result<DateTime<Utc>> {
        self.check(TAG_GENERALIZED_TIME)?;
        let text = std::str::from_utf8(self.content)
            .map_err(|_| malformed("GeneralizedTime is not ASCII"))?;
        let text = text
            .strip_suffix('Z')
            .ok_or_else(|| malformed(format!("GeneralizedTime {text} is not UTC")))?;
        let (whole, fraction) = match text.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (text, ""),
        };
        let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
            .map_err(|e| malformed(format!("GeneralizedTime {text}: {e}")))?;
        let mut nanos: u32 = 0;
        for (i, c) in fraction.chars().take(9).enumerate() {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| malformed("GeneralizedTime fraction is not numeric"))?;
            nanos += digit * 10u32.pow(8 - i as u32);
        }
        let time = Utc.from_utc_datetime(&naive);
        Ok(time + chrono::Duration::nanoseconds(i64::from(nanos)))
    }

    pub fn as_utf8(&self) -> Result<&'a str> {
        self.check(TAG_UTF8_STRING)?;
        std::str::from_utf8(self.content).map_err(|_| malformed("invalid UTF8String"))
    }

    fn check(&self, tag: u8) -> Result<()> {
        if self.tag != tag {
            return Err(malformed(format!(
                "expected tag 0x{tag:02x}, found 0x{:02x}",
                self.tag
            )));
        }
        Ok(())
    }
}

/// Sequential reader over concatenated DER elements.
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    data: &'a [u8],
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn read(&mut self) -> Result<Tlv<'a>> {
        let data = self.data;
        let tag = *data.first().ok_or_else(|| malformed("unexpected end of input"))?;
        if tag & 0x1F == 0x1F {
            return Err(malformed("multi-byte tags are not supported"));
        }
        let first = *data.get(1).ok_or_else(|| malformed("missing length"))?;
        let (len, header) = if first < 0x80 {
            (usize::from(first), 2)
        } else {
            let count = usize::from(first & 0x7F);
            if count == 0 {
                return Err(malformed("indefinite length is not DER"));
            }
            if count > std::mem::size_of::<usize>() {
                return Err(malformed("length too large"));
            }
            let bytes = data
                .get(2..2 + count)
                .ok_or_else(|| malformed("truncated length"))?;
            let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            (len, 2 + count)
        };
        let end = header
            .checked_add(len)
            .ok_or_else(|| malformed("length overflow"))?;
        if end > data.len() {
            return Err(malformed(format!(
                "element of {len} bytes exceeds remaining {}",
                data.len() - header
            )));
        }
        self.data = &data[end..];
        Ok(Tlv {
            tag,
            content: &data[header..end],
            raw: &data[..end],
        })
    }

    pub fn expect(&mut self, tag: u8) -> Result<Tlv<'a>> {
        let tlv = self.read()?;
        tlv.check(tag)?;
        Ok(tlv)
    }

    /// Read the next element only if it carries `tag`.
    pub fn read_optional(&mut self, tag: u8) -> Result<Option<Tlv<'a>>> {
        if self.peek_tag() == Some(tag) {
            self.read().map(Some)
        } else {
            Ok(None)
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    &bytes[skip..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_form_length() {
        let content = vec![0xAB; 300];
        let encoded = octet_string(&content);
        assert_eq!(&encoded[..4], &[TAG_OCTET_STRING, 0x82, 0x01, 0x2C]);

        let mut reader = DerReader::new(&encoded);
        let tlv = reader.expect(TAG_OCTET_STRING).unwrap();
        assert_eq!(tlv.content, content.as_slice());
        assert!(reader.is_empty());
    }

    #[test]
    fn test_integer_sign_padding() {
        assert_eq!(small_integer(1), vec![TAG_INTEGER, 1, 1]);
        assert_eq!(small_integer(0x80), vec![TAG_INTEGER, 2, 0, 0x80]);
        assert_eq!(small_integer(0), vec![TAG_INTEGER, 1, 0]);

        let encoded = unsigned_integer(&[0x00, 0x00, 0xF1, 0x02]);
        let tlv = DerReader::new(&encoded).read().unwrap();
        assert_eq!(tlv.as_unsigned_integer().unwrap(), &[0xF1, 0x02]);
        assert_eq!(tlv.as_u64().unwrap(), 0xF102);
    }

    #[test]
    fn test_generalized_time_with_fraction() {
        let encoded = tlv(TAG_GENERALIZED_TIME, b"20240131235959.25Z");
        let time = DerReader::new(&encoded).read().unwrap().as_generalized_time().unwrap();
        assert_eq!(time.to_rfc3339(), "2024-01-31T23:59:59.250+00:00");

        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let encoded = generalized_time(now);
        let parsed = DerReader::new(&encoded).read().unwrap().as_generalized_time().unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_truncated_and_indefinite_rejected() {
        assert!(DerReader::new(&[TAG_SEQUENCE, 0x05, 0x01]).read().is_err());
        assert!(DerReader::new(&[TAG_SEQUENCE, 0x80, 0x00, 0x00]).read().is_err());
        assert!(DerReader::new(&[]).read().is_err());
    }

    #[test]
    fn test_optional_elements() {
        let encoded = [boolean(true), small_integer(5)].concat();
        let mut reader = DerReader::new(&encoded);
        assert!(reader.read_optional(TAG_INTEGER).unwrap().is_none());
        assert!(reader.read_optional(TAG_BOOLEAN).unwrap().unwrap().as_bool().unwrap());
        assert_eq!(reader.read().unwrap().as_u64().unwrap(), 5);
    }
}
