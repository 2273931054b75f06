//! Line-oriented on-disk encoding for identity records.
//!
//! ```text
//! # identity-store v1
//! 3f1c09a2 {"identifier":"someckey99","roles":["admin"],...}
//! ```
//!
//! Each entry carries a CRC32 of its JSON body, so a torn or hand-edited line
//! is detected and skipped on its own instead of poisoning the whole file.

use super::record::IdentityRecord;
use crc32fast::Hasher as Crc32;

/// First line of every store file written by this crate.
pub const HEADER: &str = "# identity-store v1";

fn checksum(body: &str) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(body.as_bytes());
    hasher.finalize()
}

/// Encodes one record as a single checksummed line (without the newline).
pub fn encode_entry(record: &IdentityRecord) -> Result<String, serde_json::Error> {
    let body = serde_json::to_string(record)?;
    Ok(format!("{:08x} {}", checksum(&body), body))
}

/// Decodes one entry line, returning a human-readable reason on failure.
pub fn decode_entry(line: &str) -> Result<IdentityRecord, String> {
    let (crc_hex, body) = line
        .split_once(' ')
        .ok_or_else(|| "missing checksum separator".to_string())?;

    if crc_hex.len() != 8 {
        return Err(format!("malformed checksum {crc_hex:?}"));
    }
    let expected = u32::from_str_radix(crc_hex, 16)
        .map_err(|_| format!("malformed checksum {crc_hex:?}"))?;
    let actual = checksum(body);
    if expected != actual {
        return Err(format!("checksum mismatch: stored {expected:08x}, computed {actual:08x}"));
    }

    serde_json::from_str(body).map_err(|e| format!("undecodable record: {e}"))
}

/// Encodes a full store file, header first, one entry per line.
pub fn encode_all<'a, I>(records: I) -> Result<String, serde_json::Error>
where
    I: IntoIterator<Item = &'a IdentityRecord>,
{
    let mut out = String::with_capacity(256);
    out.push_str(HEADER);
    out.push('\n');
    for record in records {
        out.push_str(&encode_entry(record)?);
        out.push('\n');
    }
    Ok(out)
}
