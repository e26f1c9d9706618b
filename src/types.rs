//! Strong typing with newtypes for domain concepts.
//!
//! This module provides type-safe wrappers around primitive types to prevent
//! common errors and provide better API design through the type system.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::metadata::{DESCRIPTION_MAX, SEQUENCE_ID_MAX};

/// Container format of a raw buffer, as classified by the format detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceFormat {
    /// `>` header followed by sequence lines.
    Fasta,
    /// Four-line records opening with `@`.
    Fastq,
    /// Flat file opening with `LOCUS`.
    GenBank,
    /// Bare nucleotide symbols.
    Raw,
    /// Anything else.
    #[default]
    Unknown,
}

impl SourceFormat {
    /// Label used in storage headers.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Fasta => "FASTA",
            SourceFormat::Fastq => "FASTQ",
            SourceFormat::GenBank => "GENBANK",
            SourceFormat::Raw => "RAW",
            SourceFormat::Unknown => "UNKNOWN",
        }
    }

    /// Inverse of [`SourceFormat::as_str`].
    pub fn from_label(label: &str) -> Self {
        match label {
            "FASTA" => SourceFormat::Fasta,
            "FASTQ" => SourceFormat::Fastq,
            "GENBANK" => SourceFormat::GenBank,
            "RAW" => SourceFormat::Raw,
            _ => SourceFormat::Unknown,
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned string capped at `MAX` bytes.
///
/// Construction never fails: longer input is truncated at the last UTF-8
/// boundary that fits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct BoundedString<const MAX: usize>(String);

impl<const MAX: usize> BoundedString<MAX> {
    /// Create a bounded string, truncating if needed.
    pub fn new(value: &str) -> Self {
        let mut end = value.len().min(MAX);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        Self(value[..end].to_string())
    }

    /// Borrow the contents.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Maximum length in bytes.
    pub const fn max_len() -> usize {
        MAX
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const MAX: usize> From<String> for BoundedString<MAX> {
    fn from(value: String) -> Self {
        if value.len() <= MAX {
            Self(value)
        } else {
            Self::new(&value)
        }
    }
}

impl<const MAX: usize> From<BoundedString<MAX>> for String {
    fn from(value: BoundedString<MAX>) -> Self {
        value.0
    }
}

impl<const MAX: usize> std::fmt::Display for BoundedString<MAX> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sequence identifier, at most 128 bytes.
pub type SequenceId = BoundedString<SEQUENCE_ID_MAX>;

/// Free-text sequence description, at most 256 bytes.
pub type Description = BoundedString<DESCRIPTION_MAX>;

/// SHA-256 digest of a payload, serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse 64 hex characters.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Digest::from_hex(&hex).ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

/// Identifier and description lifted from a container header line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceHeader {
    /// First whitespace-delimited token after the marker.
    pub id: SequenceId,
    /// Remainder of the header line.
    pub description: Description,
}

impl SequenceHeader {
    /// Split a header line (marker already removed) into id and description.
    pub fn from_line(line: &str) -> Self {
        let line = line.trim();
        match line.split_once(char::is_whitespace) {
            Some((id, rest)) => Self {
                id: SequenceId::new(id),
                description: Description::new(rest.trim_start()),
            },
            None => Self {
                id: SequenceId::new(line),
                description: Description::default(),
            },
        }
    }
}

/// Descriptive record built by the Encode stage for every sequence.
///
/// Immutable once created; the Store stage only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceMetadata {
    /// Run-unique number assigned by the Encode stage.
    pub sequence_number: u64,
    /// Identifier from the container header, or a generated one.
    pub sequence_id: SequenceId,
    /// Header description, possibly empty.
    pub description: Description,
    /// Detected container format.
    pub source_format: SourceFormat,
    /// Number of nucleotides before packing.
    pub original_length: u64,
    /// Number of packed bytes.
    pub encoded_length: u64,
    /// Milliseconds since the Unix epoch at encode time.
    pub timestamp: u64,
    /// CRC-32 of the nucleotide payload.
    pub crc32: u32,
    /// Optional SHA-256 of the nucleotide payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Digest>,
}

/// Milliseconds since the Unix epoch, saturating to zero on a clock before 1970.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_string_truncates_silently() {
        let long = "x".repeat(300);
        let id = SequenceId::new(&long);
        assert_eq!(id.as_str().len(), 128);

        let desc: Description = long.clone().into();
        assert_eq!(desc.as_str().len(), 256);
    }

    #[test]
    fn test_bounded_string_respects_char_boundary() {
        // 'é' is two bytes; 3 of them need 6 bytes
        let s = BoundedString::<5>::new("ééé");
        assert_eq!(s.as_str(), "éé");
    }

    #[test]
    fn test_header_split() {
        let header = SequenceHeader::from_line("seq1 Homo sapiens chr1");
        assert_eq!(header.id.as_str(), "seq1");
        assert_eq!(header.description.as_str(), "Homo sapiens chr1");

        let bare = SequenceHeader::from_line("seq2\r");
        assert_eq!(bare.id.as_str(), "seq2");
        assert!(bare.description.is_empty());
    }

    #[test]
    fn test_format_labels() {
        for format in [
            SourceFormat::Fasta,
            SourceFormat::Fastq,
            SourceFormat::GenBank,
            SourceFormat::Raw,
            SourceFormat::Unknown,
        ] {
            assert_eq!(SourceFormat::from_label(format.as_str()), format);
        }
    }

    #[test]
    fn test_metadata_json_uses_hex_digest() {
        let meta = SequenceMetadata {
            sequence_number: 7,
            sequence_id: SequenceId::new("seq1"),
            description: Description::default(),
            source_format: SourceFormat::Fasta,
            original_length: 8,
            encoded_length: 2,
            timestamp: 1,
            crc32: 0xDEAD_BEEF,
            sha256: Some(Digest([0xAB; 32])),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        assert!(json.contains("\"FASTA\""));

        let back: SequenceMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
