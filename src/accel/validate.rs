//! Nucleotide alphabet validation.
//!
//! The vector paths compare a 16-byte chunk against every allowed symbol in
//! parallel, OR the equality masks together and reject the chunk unless every
//! lane matched. Bytes past the last full chunk go through the scalar rule.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

use super::CpuFeatures;
use crate::constants::nucleotide::{ALPHABET, VECTOR_WIDTH};

/// Implementation used by [`validate_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorBackend {
    /// 16-lane byte compare (SSE2 or NEON).
    Vector,
    /// One byte at a time.
    Scalar,
}

impl ValidatorBackend {
    /// Best backend for the given CPU.
    pub fn from_features(features: &CpuFeatures) -> Self {
        if features.vector_compare {
            ValidatorBackend::Vector
        } else {
            ValidatorBackend::Scalar
        }
    }

    /// Best backend for the running CPU.
    pub fn detect() -> Self {
        Self::from_features(&super::cpu_features())
    }
}

const NUCLEOTIDE_TABLE: [bool; 256] = {
    let mut table = [false; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = true;
        i += 1;
    }
    table
};

/// Scalar rule shared by every backend.
#[inline(always)]
pub fn is_nucleotide(byte: u8) -> bool {
    NUCLEOTIDE_TABLE[byte as usize]
}

/// Validate with the fastest backend the CPU supports.
#[inline]
pub fn validate(bytes: &[u8]) -> bool {
    validate_with(ValidatorBackend::detect(), bytes)
}

/// Validate with an explicit backend.
///
/// Requesting [`ValidatorBackend::Vector`] on a CPU without the instructions
/// silently runs the scalar path.
pub fn validate_with(backend: ValidatorBackend, bytes: &[u8]) -> bool {
    match backend {
        ValidatorBackend::Scalar => validate_scalar(bytes),
        ValidatorBackend::Vector => validate_vector(bytes),
    }
}

/// Byte-by-byte reference implementation.
pub fn validate_scalar(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| is_nucleotide(b))
}

#[cfg(target_arch = "x86_64")]
fn validate_vector(bytes: &[u8]) -> bool {
    if bytes.len() < VECTOR_WIDTH || !super::cpu_features().vector_compare {
        return validate_scalar(bytes);
    }
    // SAFETY: SSE2 support was checked above.
    unsafe { validate_sse2(bytes) }
}

#[cfg(target_arch = "aarch64")]
fn validate_vector(bytes: &[u8]) -> bool {
    if bytes.len() < VECTOR_WIDTH || !super::cpu_features().vector_compare {
        return validate_scalar(bytes);
    }
    // SAFETY: NEON support was checked above.
    unsafe { validate_neon(bytes) }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn validate_vector(bytes: &[u8]) -> bool {
    validate_scalar(bytes)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn validate_sse2(bytes: &[u8]) -> bool {
    let symbols = ALPHABET.map(|s| _mm_set1_epi8(s as i8));

    let chunks = bytes.chunks_exact(VECTOR_WIDTH);
    let remainder = chunks.remainder();

    for chunk in chunks {
        let data = _mm_loadu_si128(chunk.as_ptr() as *const __m128i);

        let valid = symbols.iter().fold(_mm_setzero_si128(), |acc, &symbol| {
            _mm_or_si128(acc, _mm_cmpeq_epi8(data, symbol))
        });

        // One bit per lane; all sixteen must be set
        if _mm_movemask_epi8(valid) != 0xFFFF {
            return false;
        }
    }

    validate_scalar(remainder)
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn validate_neon(bytes: &[u8]) -> bool {
    let symbols = ALPHABET.map(|s| vdupq_n_u8(s));

    let chunks = bytes.chunks_exact(VECTOR_WIDTH);
    let remainder = chunks.remainder();

    for chunk in chunks {
        let data = vld1q_u8(chunk.as_ptr());

        let valid = symbols
            .iter()
            .fold(vdupq_n_u8(0), |acc, &symbol| vorrq_u8(acc, vceqq_u8(data, symbol)));

        // A lane that matched nothing is 0x00, so the minimum drops below 0xFF
        if vminvq_u8(valid) != 0xFF {
            return false;
        }
    }

    validate_scalar(remainder)
}
