use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::{Error, Result};

/// On-disk format version. Only version 1 is defined; the version is the
/// first component of every segment file name.
pub const FORMAT_VERSION: u64 = 1;

const SEGMENT_SUFFIX: &str = ".log";

/// Parsed form of one header line, without the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub sequence: u64,
    pub timestamp: i64,
    pub message_size: u32,
    pub hash: String,
}

/// One log record: header fields plus the body as written, trailing LF
/// included. `message_size` always equals `body.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sequence: u64,
    pub timestamp: i64,
    pub message_size: u32,
    pub hash: String,
    pub body: Vec<u8>,
}

impl Record {
    /// Builds the record for a framed body. The hash is computed here so the
    /// acked value and the on-disk value cannot diverge.
    pub fn new(sequence: u64, timestamp: i64, body: Vec<u8>) -> Self {
        let hash = body_hash(&body);
        Self {
            sequence,
            timestamp,
            message_size: body.len() as u32,
            hash,
            body,
        }
    }

    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            sequence: self.sequence,
            timestamp: self.timestamp,
            message_size: self.message_size,
            hash: self.hash.clone(),
        }
    }

    /// Serialized header line including the terminating LF. The body follows
    /// the line directly; there is no delimiter after the body.
    pub fn encode(&self) -> (Vec<u8>, &[u8]) {
        let header = format!(
            "{}-{}-{}-{}\n",
            self.sequence, self.timestamp, self.message_size, self.hash
        );
        (header.into_bytes(), &self.body)
    }
}

/// Appends the single trailing LF the log guarantees, unless the submitted
/// body already ends in one.
pub fn frame_body(mut body: Vec<u8>) -> Vec<u8> {
    if body.last() != Some(&b'\n') {
        body.push(b'\n');
    }
    body
}

/// base64 of the SHA-1 digest of the body as written (28 ASCII chars).
pub fn body_hash(body: &[u8]) -> String {
    BASE64.encode(Sha1::digest(body))
}

/// Parses one header line (LF already stripped). The match is anchored: any
/// leftover bytes, missing field, or out-of-range numeric fails.
pub fn decode_header(line: &[u8]) -> Result<RecordHeader> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::MalformedHeader("header is not ASCII"))?;
    let mut parts = line.splitn(4, '-');
    let sequence = parse_decimal_u64(parts.next().unwrap_or(""))
        .ok_or(Error::MalformedHeader("bad sequence field"))?;
    let timestamp = parse_decimal_i64(parts.next().unwrap_or(""))
        .ok_or(Error::MalformedHeader("bad timestamp field"))?;
    let message_size = parse_decimal_u32(parts.next().unwrap_or(""))
        .ok_or(Error::MalformedHeader("bad message size field"))?;
    let hash = parts.next().unwrap_or("");
    if hash.is_empty() || !hash.bytes().all(is_base64_byte) {
        return Err(Error::MalformedHeader("bad hash field"));
    }
    Ok(RecordHeader {
        sequence,
        timestamp,
        message_size,
        hash: hash.to_string(),
    })
}

/// True iff the name matches `^1-(\d+)\.log$`.
pub fn validate_segment_name(name: &str) -> bool {
    segment_name_digits(name).is_some()
}

/// Returns `(version, starting_sequence)`. A name that passes validation but
/// overflows the sequence parse is reported as malformed; given the anchored
/// pattern that indicates a logic error upstream.
pub fn parse_segment_name(name: &str) -> Result<(u64, u64)> {
    let digits =
        segment_name_digits(name).ok_or_else(|| Error::MalformedName(name.to_string()))?;
    let starting_sequence = digits
        .parse::<u64>()
        .map_err(|_| Error::MalformedName(name.to_string()))?;
    Ok((FORMAT_VERSION, starting_sequence))
}

pub fn segment_file_name(starting_sequence: u64) -> String {
    format!("{FORMAT_VERSION}-{starting_sequence}{SEGMENT_SUFFIX}")
}

fn segment_name_digits(name: &str) -> Option<&str> {
    let digits = name.strip_prefix("1-")?.strip_suffix(SEGMENT_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits)
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

// The grammar admits only bare digit runs; Rust's FromStr also accepts a
// leading `+`, so the charset is checked first.
fn parse_decimal_u64(field: &str) -> Option<u64> {
    all_digits(field)?;
    field.parse().ok()
}

fn parse_decimal_i64(field: &str) -> Option<i64> {
    all_digits(field)?;
    field.parse().ok()
}

fn parse_decimal_u32(field: &str) -> Option<u32> {
    all_digits(field)?;
    field.parse().ok()
}

fn all_digits(field: &str) -> Option<()> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(())
}
