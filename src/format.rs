//! Container format detection from a buffer's leading bytes.

use crate::accel;
use crate::constants::format::{GENBANK_KEYWORD, RAW_PROBE_LEN};
use crate::types::SourceFormat;

/// Classify `bytes` by their first bytes.
///
/// `>` is FASTA, `@` is FASTQ, a leading `LOCUS` is GenBank. Otherwise the
/// buffer is Raw when its first 1024 bytes (or fewer) pass the validator, and
/// Unknown when they do not. Empty input is Unknown.
pub fn detect(bytes: &[u8]) -> SourceFormat {
    match bytes.first() {
        None => SourceFormat::Unknown,
        Some(b'>') => SourceFormat::Fasta,
        Some(b'@') => SourceFormat::Fastq,
        Some(_) if bytes.starts_with(GENBANK_KEYWORD) => SourceFormat::GenBank,
        Some(_) => {
            let probe = &bytes[..bytes.len().min(RAW_PROBE_LEN)];
            if accel::validate(probe) {
                SourceFormat::Raw
            } else {
                SourceFormat::Unknown
            }
        }
    }
}
