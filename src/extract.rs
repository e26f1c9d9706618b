//! Payload extraction from container formats.
//!
//! Every extractor compacts the nucleotide payload to the front of the frame
//! buffer. The write cursor never overtakes the read cursor, so no scratch
//! buffer is needed.

use crate::error::ParseError;
use crate::types::{Description, SequenceHeader, SequenceId, SourceFormat};

/// Outcome of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Payload length now at the front of the buffer.
    pub len: usize,
    /// Header found in the container, if the format carries one.
    pub header: Option<SequenceHeader>,
}

/// Extract the payload of `buf[..len]` according to `format`.
pub fn extract_in_place(
    buf: &mut [u8],
    len: usize,
    format: SourceFormat,
) -> Result<Extracted, ParseError> {
    let len = len.min(buf.len());
    let extracted = match format {
        SourceFormat::Fasta => extract_fasta(buf, len),
        SourceFormat::Fastq => extract_fastq(buf, len)?,
        SourceFormat::GenBank => extract_genbank(buf, len)?,
        SourceFormat::Raw | SourceFormat::Unknown => Extracted {
            len: compact_symbols(buf, 0, 0, len, false),
            header: None,
        },
    };

    if extracted.len == 0 {
        return Err(ParseError::EmptyPayload);
    }
    Ok(extracted)
}

/// Line cursor over `buf[..end]`.
struct Lines {
    pos: usize,
    end: usize,
}

impl Lines {
    fn new(start: usize, end: usize) -> Self {
        Self { pos: start, end }
    }

    /// Next line as `(start, end)` without its terminator.
    fn next(&mut self, buf: &[u8]) -> Option<(usize, usize)> {
        if self.pos >= self.end {
            return None;
        }
        let start = self.pos;
        let stop = buf[start..self.end]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.end, |i| start + i);
        self.pos = stop + 1;

        let mut line_end = stop;
        if line_end > start && buf[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        Some((start, line_end))
    }
}

/// Move the non-whitespace bytes of `buf[from..to]` to `buf[write..]`.
///
/// With `genbank` set, digits are dropped too and letters are upper-cased.
fn compact_symbols(buf: &mut [u8], mut write: usize, from: usize, to: usize, genbank: bool) -> usize {
    for read in from..to {
        let b = buf[read];
        if b.is_ascii_whitespace() || (genbank && b.is_ascii_digit()) {
            continue;
        }
        buf[write] = if genbank { b.to_ascii_uppercase() } else { b };
        write += 1;
    }
    write
}

fn header_from(buf: &[u8], start: usize, end: usize) -> SequenceHeader {
    SequenceHeader::from_line(&String::from_utf8_lossy(&buf[start..end]))
}

/// `>id description` then sequence lines up to the next record.
fn extract_fasta(buf: &mut [u8], len: usize) -> Extracted {
    let mut lines = Lines::new(0, len);
    let header = lines.next(buf).map(|(s, e)| header_from(buf, s + 1, e));

    let mut write = 0;
    while let Some((s, e)) = lines.next(buf) {
        if buf.get(s) == Some(&b'>') {
            break;
        }
        write = compact_symbols(buf, write, s, e, false);
    }

    Extracted { len: write, header }
}

/// Four-line records; the sequence lines of all records are concatenated.
fn extract_fastq(buf: &mut [u8], len: usize) -> Result<Extracted, ParseError> {
    let mut lines = Lines::new(0, len);
    let mut header = None;
    let mut write = 0;

    while let Some((s, e)) = lines.next(buf) {
        if s == e {
            continue;
        }
        let record = header_from(buf, s + 1, e);
        let id = record.id.as_str().to_string();
        if header.is_none() {
            header = Some(record);
        }

        let (seq_start, seq_end) = match lines.next(buf) {
            Some((ss, se)) if ss < se && buf[ss] != b'+' => (ss, se),
            _ => return Err(ParseError::MissingSequence(id)),
        };
        match lines.next(buf) {
            Some((ps, pe)) if ps < pe && buf[ps] == b'+' => {}
            _ => return Err(ParseError::MissingSeparator(id)),
        }
        write = compact_symbols(buf, write, seq_start, seq_end, false);

        // Quality line; may legitimately start with '@'
        lines.next(buf);
    }

    Ok(Extracted { len: write, header })
}

/// `LOCUS` id, optional `DEFINITION`, payload from `ORIGIN` up to `//`.
fn extract_genbank(buf: &mut [u8], len: usize) -> Result<Extracted, ParseError> {
    let mut lines = Lines::new(0, len);
    let mut id = SequenceId::default();
    let mut description = Description::default();
    let mut origin = None;

    while let Some((s, e)) = lines.next(buf) {
        let line = &buf[s..e];
        if let Some(rest) = line.strip_prefix(b"LOCUS") {
            let rest = String::from_utf8_lossy(rest);
            if let Some(token) = rest.split_whitespace().next() {
                id = SequenceId::new(token);
            }
        } else if let Some(rest) = line.strip_prefix(b"DEFINITION") {
            description = Description::new(String::from_utf8_lossy(rest).trim());
        } else if line.starts_with(b"ORIGIN") {
            origin = Some(lines.pos);
            break;
        }
    }

    let start = origin.ok_or(ParseError::MissingOrigin)?;
    let mut body = Lines::new(start, len);
    let mut write = 0;
    while let Some((s, e)) = body.next(buf) {
        if buf[s..e].starts_with(b"//") {
            break;
        }
        write = compact_symbols(buf, write, s, e, true);
    }

    Ok(Extracted {
        len: write,
        header: Some(SequenceHeader { id, description }),
    })
}
