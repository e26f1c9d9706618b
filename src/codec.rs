//! 2-bit nucleotide packing.
//!
//! `A=00`, `T=01`, `G=10`, `C=11`, four symbols per byte with the first symbol
//! in the most significant pair. Lowercase input is accepted; any other byte
//! (including `N`) encodes as `A`. The final byte is zero-padded in its low bits.

use crate::constants::nucleotide::{BITS_PER_SYMBOL, SYMBOLS_PER_BYTE};

const DECODE: [u8; 4] = [b'A', b'T', b'G', b'C'];

/// 2-bit code of a single symbol.
#[inline(always)]
pub fn encode_symbol(symbol: u8) -> u8 {
    match symbol {
        b'A' | b'a' => 0b00,
        b'T' | b't' => 0b01,
        b'G' | b'g' => 0b10,
        b'C' | b'c' => 0b11,
        _ => 0b00,
    }
}

/// Symbol for a 2-bit code; only the low two bits are read.
#[inline(always)]
pub fn decode_symbol(code: u8) -> u8 {
    DECODE[(code & 0b11) as usize]
}

/// Number of bytes needed to pack `symbols` nucleotides.
#[inline]
pub const fn packed_len(symbols: usize) -> usize {
    symbols.div_ceil(SYMBOLS_PER_BYTE)
}

#[inline(always)]
fn pack_group(group: &[u8]) -> u8 {
    let mut byte = 0u8;
    for (i, &symbol) in group.iter().enumerate() {
        let shift = 6 - i * BITS_PER_SYMBOL;
        byte |= encode_symbol(symbol) << shift;
    }
    byte
}

/// Pack `symbols` into a new buffer.
pub fn pack(symbols: &[u8]) -> Vec<u8> {
    symbols
        .chunks(SYMBOLS_PER_BYTE)
        .map(pack_group)
        .collect()
}

/// Pack the first `len` bytes of `buf` into its own prefix and return the
/// packed length.
///
/// Output byte `i` only reads input bytes `4i..4i+4`, which are never behind
/// the write position, so the rewrite is safe front to back.
pub fn pack_in_place(buf: &mut [u8], len: usize) -> usize {
    let len = len.min(buf.len());
    let out_len = packed_len(len);
    for i in 0..out_len {
        let start = i * SYMBOLS_PER_BYTE;
        let end = (start + SYMBOLS_PER_BYTE).min(len);
        let byte = pack_group(&buf[start..end]);
        buf[i] = byte;
    }
    out_len
}

/// Unpack `symbols` nucleotides from `packed`.
///
/// Stops early if `packed` is too short for the requested count.
pub fn unpack(packed: &[u8], symbols: usize) -> Vec<u8> {
    let symbols = symbols.min(packed.len() * SYMBOLS_PER_BYTE);
    let mut out = Vec::with_capacity(symbols);
    for i in 0..symbols {
        let byte = packed[i / SYMBOLS_PER_BYTE];
        let shift = 6 - (i % SYMBOLS_PER_BYTE) * BITS_PER_SYMBOL;
        out.push(decode_symbol(byte >> shift));
    }
    out
}
