//! On-disk format of encoded sequence files.
//!
//! ```text
//! INCHROSIL
//! ID: seq1
//! Client: /dev/ttyUSB0
//! Format: FASTA
//! Length: 8
//! Checksum: 0x1a2b3c4d
//! Timestamp: 1718000000000
//! ---
//! <packed payload>
//! ```
//!
//! `Length` counts nucleotides, not packed bytes.

use crate::constants::storage::{HEADER_TERMINATOR, MAGIC};
use crate::error::{ProcessorError, Result};
use crate::types::{SequenceMetadata, SourceFormat};

/// Text header preceding the packed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub id: String,
    pub client: String,
    pub format: SourceFormat,
    pub length: u64,
    pub checksum: u32,
    pub timestamp: u64,
}

impl RecordHeader {
    /// Header for a sequence received on channel `client`.
    pub fn from_metadata(metadata: &SequenceMetadata, client: &str) -> Self {
        Self {
            id: metadata.sequence_id.as_str().to_string(),
            client: client.to_string(),
            format: metadata.source_format,
            length: metadata.original_length,
            checksum: metadata.crc32,
            timestamp: metadata.timestamp,
        }
    }

    /// Append the rendered header to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        // Header fields are single-line by construction
        let clean = |s: &str| s.replace(['\n', '\r'], " ");
        let text = format!(
            "{}\nID: {}\nClient: {}\nFormat: {}\nLength: {}\nChecksum: 0x{:08x}\nTimestamp: {}\n{}\n",
            MAGIC,
            clean(&self.id),
            clean(&self.client),
            self.format,
            self.length,
            self.checksum,
            self.timestamp,
            HEADER_TERMINATOR
        );
        out.extend_from_slice(text.as_bytes());
    }
}

/// A parsed encoded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl EncodedRecord {
    /// Header followed by `payload`.
    pub fn render(header: &RecordHeader, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + payload.len());
        header.write_to(&mut out);
        out.extend_from_slice(payload);
        out
    }

    /// Parse a complete encoded file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| ProcessorError::Storage(format!("corrupt record: {}", what));

        let mut pos = 0;
        if take_line(bytes, &mut pos) != Some(MAGIC.as_bytes()) {
            return Err(corrupt("missing magic"));
        }

        let mut id = None;
        let mut client = None;
        let mut format = None;
        let mut length = None;
        let mut checksum = None;
        let mut timestamp = None;

        loop {
            let line = take_line(bytes, &mut pos).ok_or_else(|| corrupt("unterminated header"))?;
            if line == HEADER_TERMINATOR.as_bytes() {
                break;
            }
            let line = std::str::from_utf8(line).map_err(|_| corrupt("header is not UTF-8"))?;
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| corrupt("malformed header line"))?;
            match key {
                "ID" => id = Some(value.to_string()),
                "Client" => client = Some(value.to_string()),
                "Format" => format = Some(SourceFormat::from_label(value)),
                "Length" => length = value.parse::<u64>().ok(),
                "Checksum" => {
                    let hex = value.trim_start_matches("0x").trim_start_matches("0X");
                    checksum = u32::from_str_radix(hex, 16).ok();
                }
                "Timestamp" => timestamp = value.parse::<u64>().ok(),
                _ => {}
            }
        }

        let header = RecordHeader {
            id: id.ok_or_else(|| corrupt("missing ID"))?,
            client: client.unwrap_or_default(),
            format: format.unwrap_or_default(),
            length: length.ok_or_else(|| corrupt("missing or invalid Length"))?,
            checksum: checksum.ok_or_else(|| corrupt("missing or invalid Checksum"))?,
            timestamp: timestamp.unwrap_or_default(),
        };

        Ok(Self {
            header,
            payload: bytes[pos..].to_vec(),
        })
    }
}

fn take_line<'a>(bytes: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let rest = bytes.get(*pos..)?;
    let end = rest.iter().position(|&b| b == b'\n')?;
    *pos += end + 1;
    Some(&rest[..end])
}
