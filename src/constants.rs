//! Domain constants for the DNA serial processor.
//!
//! This module contains compile-time constants used throughout the crate.
//! These are separated from runtime configuration to provide clear distinction
//! between values that never change and those that can be configured.

/// Memory layout constants.
pub mod layout {
    /// Cache line size of the Cortex-A76 (and every x86_64 part we target).
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Page size that one frame is sized against.
    pub const PAGE_SIZE: usize = 4096;

    /// Usable bytes in one frame: a page minus one cache line of header room.
    pub const FRAME_CAPACITY: usize = PAGE_SIZE - CACHE_LINE_SIZE;

    /// Frames preallocated even when the memory pool hint is tiny.
    pub const MIN_POOL_FRAMES: usize = 16;
}

/// Nucleotide alphabet and packing constants.
pub mod nucleotide {
    /// Symbols accepted by the validator.
    pub const ALPHABET: [u8; 5] = [b'A', b'T', b'C', b'G', b'N'];

    /// Width of one vector comparison in bytes.
    pub const VECTOR_WIDTH: usize = 16;

    /// Nucleotides packed into one byte.
    pub const SYMBOLS_PER_BYTE: usize = 4;

    /// Bits used per nucleotide.
    pub const BITS_PER_SYMBOL: usize = 2;
}

/// Format detection constants.
pub mod format {
    /// Number of leading bytes inspected when deciding whether a buffer is raw sequence.
    pub const RAW_PROBE_LEN: usize = 1024;

    /// GenBank records open with this keyword.
    pub const GENBANK_KEYWORD: &[u8; 5] = b"LOCUS";
}

/// Metadata bounds. Longer values are truncated silently.
pub mod metadata {
    /// Maximum byte length of a sequence identifier.
    pub const SEQUENCE_ID_MAX: usize = 128;

    /// Maximum byte length of a sequence description.
    pub const DESCRIPTION_MAX: usize = 256;
}

/// CRC-32 (IEEE 802.3, reflected) parameters.
pub mod crc {
    /// Reflected generator polynomial.
    pub const POLYNOMIAL: u32 = 0xEDB8_8320;

    /// Register preset.
    pub const INITIAL: u32 = 0xFFFF_FFFF;

    /// Check value over `b"123456789"`.
    pub const CHECK: u32 = 0xCBF4_3926;
}

/// Storage file format constants.
pub mod storage {
    /// First line of every encoded file.
    pub const MAGIC: &str = "INCHROSIL";

    /// Line that terminates the text header.
    pub const HEADER_TERMINATOR: &str = "---";

    /// Extension of encoded sequence files.
    pub const ENCODED_EXTENSION: &str = "ich";

    /// Name of the JSON-lines metadata index.
    pub const INDEX_FILE: &str = "index.jsonl";

    /// Probe file written at startup to check that the base path is writable.
    pub const WRITE_PROBE_FILE: &str = ".write-probe";
}

/// Thermal governance constants for the Raspberry Pi 5 class of boards.
pub mod thermal {
    /// Default throttling threshold in degrees Celsius.
    pub const DEFAULT_THRESHOLD_C: f32 = 80.0;

    /// Default sysfs temperature node (millidegrees Celsius).
    pub const DEFAULT_SENSOR_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

    /// Root of the per-CPU frequency governor nodes.
    pub const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";

    /// Governor selected while the processor runs in performance mode.
    pub const PERFORMANCE_GOVERNOR: &str = "performance";
}

/// Centralized timing constants.
pub mod timeouts {
    use std::time::Duration;

    /// Interval between periodic write-cache flushes.
    pub const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

    /// Spins performed before an idle worker sleeps.
    pub const IDLE_SPINS: u32 = 64;

    /// Serial read timeout handed to the device layer.
    pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(10);

    /// Poll period of the stop loop in the thermal sampler.
    pub const SAMPLER_POLL: Duration = Duration::from_millis(50);
}
