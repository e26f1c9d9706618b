//! Hardware-accelerated primitives for the hot path.
//!
//! Two kernels live here:
//!
//! - [`validate`]: checks that a byte run only holds `A`, `T`, `C`, `G` or `N`,
//!   sixteen bytes at a time with SSE2 (x86_64) or NEON (aarch64).
//! - [`checksum`]: reflected CRC-32 using the ARMv8 CRC instructions, an
//!   eight-byte slicing table, or the canonical bitwise loop.
//!
//! Each kernel exposes its backends as an enum so callers (and tests) can force
//! a specific path. The default entry points pick the fastest backend the CPU
//! reports at runtime; every backend returns identical results.

pub mod checksum;
pub mod validate;

pub use checksum::{checksum, checksum_with, ChecksumBackend};
pub use validate::{validate, validate_scalar, validate_with, ValidatorBackend};

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::info;

/// CPU features relevant to this crate, probed once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuFeatures {
    /// 128-bit byte compare is available (SSE2 or NEON).
    pub vector_compare: bool,
    /// Native CRC-32 (IEEE polynomial) instructions are available.
    pub crc32: bool,
}

static FEATURES: Lazy<CpuFeatures> = Lazy::new(|| {
    let features = probe();
    info!(
        "Accelerated primitives: validator={:?}, checksum={:?}",
        ValidatorBackend::from_features(&features),
        ChecksumBackend::from_features(&features)
    );
    features
});

/// Features of the running CPU.
pub fn cpu_features() -> CpuFeatures {
    *FEATURES
}

#[cfg(target_arch = "x86_64")]
fn probe() -> CpuFeatures {
    CpuFeatures {
        vector_compare: is_x86_feature_detected!("sse2"),
        // SSE4.2 only carries CRC-32C, which is a different polynomial
        crc32: false,
    }
}

#[cfg(target_arch = "aarch64")]
fn probe() -> CpuFeatures {
    CpuFeatures {
        vector_compare: std::arch::is_aarch64_feature_detected!("neon"),
        crc32: std::arch::is_aarch64_feature_detected!("crc"),
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn probe() -> CpuFeatures {
    CpuFeatures {
        vector_compare: false,
        crc32: false,
    }
}
