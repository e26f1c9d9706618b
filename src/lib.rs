//! The `dna_serial_processor` core library.
//!
//! This crate provides a real-time pipeline that reads DNA sequence data from
//! serial channels, validates it with vector instructions, packs it to two bits
//! per nucleotide and writes it to disk through a write-behind cache.

pub mod accel;
pub mod channel;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod extract;
pub mod format;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod stats;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use config::ProcessorConfig;
pub use error::{ProcessorError, Result};
pub use pipeline::{Processor, ProcessorState, ShutdownHandle};
pub use stats::StatsSnapshot;
