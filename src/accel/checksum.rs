//! Reflected CRC-32 (IEEE 802.3).
//!
//! All backends compute the same function: polynomial `0xEDB88320`, register
//! preset to all ones, final complement.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::{__crc32b, __crc32d};

use super::CpuFeatures;
use crate::constants::crc::{INITIAL, POLYNOMIAL};

/// Implementation used by [`checksum_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumBackend {
    /// ARMv8 `crc32x`/`crc32b` over 8-byte words plus a byte tail.
    Hardware,
    /// Slicing-by-8 lookup tables.
    Table,
    /// Canonical bit-at-a-time loop.
    Bitwise,
}

impl ChecksumBackend {
    /// Best backend for the given CPU.
    pub fn from_features(features: &CpuFeatures) -> Self {
        if features.crc32 {
            ChecksumBackend::Hardware
        } else {
            ChecksumBackend::Table
        }
    }

    /// Best backend for the running CPU.
    pub fn detect() -> Self {
        Self::from_features(&super::cpu_features())
    }
}

/// CRC-32 with the fastest backend the CPU supports.
#[inline]
pub fn checksum(bytes: &[u8]) -> u32 {
    checksum_with(ChecksumBackend::detect(), bytes)
}

/// CRC-32 with an explicit backend.
///
/// [`ChecksumBackend::Hardware`] falls back to the table path when the CPU has
/// no CRC instructions.
pub fn checksum_with(backend: ChecksumBackend, bytes: &[u8]) -> u32 {
    match backend {
        ChecksumBackend::Hardware => checksum_hardware(bytes),
        ChecksumBackend::Table => !update_table(INITIAL, bytes),
        ChecksumBackend::Bitwise => !update_bitwise(INITIAL, bytes),
    }
}

fn update_bitwise(mut crc: u32, bytes: &[u8]) -> u32 {
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLYNOMIAL & mask);
        }
    }
    crc
}

const fn build_tables() -> [[u32; 256]; 8] {
    let mut tables = [[0u32; 256]; 8];

    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        tables[0][i] = crc;
        i += 1;
    }

    let mut slice = 1;
    while slice < 8 {
        let mut i = 0;
        while i < 256 {
            let prev = tables[slice - 1][i];
            tables[slice][i] = (prev >> 8) ^ tables[0][(prev & 0xFF) as usize];
            i += 1;
        }
        slice += 1;
    }

    tables
}

static TABLES: [[u32; 256]; 8] = build_tables();

fn update_table(mut crc: u32, bytes: &[u8]) -> u32 {
    let mut words = bytes.chunks_exact(8);
    for word in &mut words {
        let lo = u32::from_le_bytes([word[0], word[1], word[2], word[3]]) ^ crc;
        let hi = u32::from_le_bytes([word[4], word[5], word[6], word[7]]);
        crc = TABLES[7][(lo & 0xFF) as usize]
            ^ TABLES[6][((lo >> 8) & 0xFF) as usize]
            ^ TABLES[5][((lo >> 16) & 0xFF) as usize]
            ^ TABLES[4][(lo >> 24) as usize]
            ^ TABLES[3][(hi & 0xFF) as usize]
            ^ TABLES[2][((hi >> 8) & 0xFF) as usize]
            ^ TABLES[1][((hi >> 16) & 0xFF) as usize]
            ^ TABLES[0][(hi >> 24) as usize];
    }
    for &byte in words.remainder() {
        crc = (crc >> 8) ^ TABLES[0][((crc ^ byte as u32) & 0xFF) as usize];
    }
    crc
}

#[cfg(target_arch = "aarch64")]
fn checksum_hardware(bytes: &[u8]) -> u32 {
    if !super::cpu_features().crc32 {
        return !update_table(INITIAL, bytes);
    }
    // SAFETY: CRC extension support was checked above.
    unsafe { !update_crc_instructions(INITIAL, bytes) }
}

#[cfg(not(target_arch = "aarch64"))]
fn checksum_hardware(bytes: &[u8]) -> u32 {
    !update_table(INITIAL, bytes)
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "crc")]
unsafe fn update_crc_instructions(mut crc: u32, bytes: &[u8]) -> u32 {
    let mut words = bytes.chunks_exact(8);
    for word in &mut words {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(word);
        crc = __crc32d(crc, u64::from_le_bytes(buf));
    }
    for &byte in words.remainder() {
        crc = __crc32b(crc, byte);
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::crc::CHECK;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const BACKENDS: [ChecksumBackend; 3] = [
        ChecksumBackend::Hardware,
        ChecksumBackend::Table,
        ChecksumBackend::Bitwise,
    ];

    #[test]
    fn test_check_value() {
        for backend in BACKENDS {
            assert_eq!(checksum_with(backend, b"123456789"), CHECK, "{:?}", backend);
        }
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_empty_input() {
        for backend in BACKENDS {
            assert_eq!(checksum_with(backend, b""), 0);
        }
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(checksum(b"a"), 0xE8B7_BE43);
        assert_eq!(
            checksum(b"The quick brown fox jumps over the lazy dog"),
            0x414F_A339
        );
    }

    #[test]
    fn test_backends_agree() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let len = rng.random_range(0..4096usize);
            let data: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            let expected = checksum_with(ChecksumBackend::Bitwise, &data);
            assert_eq!(checksum_with(ChecksumBackend::Table, &data), expected);
            assert_eq!(checksum_with(ChecksumBackend::Hardware, &data), expected);
        }
    }
}
