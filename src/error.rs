//! Custom error types for the dna-serial-processor.
//!
//! This module provides a centralized error handling system using the `thiserror` crate
//! to define structured, typed errors with clear messages and proper error conversion.
//!
//! Only configuration-time failures surface through these types. Per-frame problems
//! (bad symbols, malformed containers, full queues, failed writes) are handled inside
//! the stage that sees them and show up as counter increments instead.

use std::io;
use thiserror::Error;

/// Primary error type for the processor, covering every failure a caller can observe.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A configured input channel could not be opened at startup.
    #[error("Failed to open channel '{device}': {source}")]
    ChannelOpen {
        /// Device identifier from the channel configuration.
        device: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The storage backend could not be prepared or read back.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker '{name}': {source}")]
    Spawn {
        /// Thread name of the worker.
        name: String,
        /// Underlying OS failure.
        #[source]
        source: io::Error,
    },

    /// Errors from the underlying IO system.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal invariant violations.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with ProcessorError.
pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Structural problems found while extracting a payload from a container.
///
/// These never leave the Parse stage; they only increment `parsing_errors`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Nothing remained after stripping headers and whitespace.
    #[error("container holds no sequence data")]
    EmptyPayload,

    /// A FASTQ record is missing its sequence line.
    #[error("FASTQ record '{0}' has no sequence line")]
    MissingSequence(String),

    /// A FASTQ record is missing the `+` separator line.
    #[error("FASTQ record '{0}' has no '+' separator")]
    MissingSeparator(String),

    /// A GenBank record has no ORIGIN section.
    #[error("GenBank record has no ORIGIN section")]
    MissingOrigin,
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to the error.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to the error.
    fn with_static_context(self, context: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ProcessorError::Internal(format!("{}: {}", f(), e)))
    }

    fn with_static_context(self, context: &'static str) -> Result<T> {
        self.map_err(|e| ProcessorError::Internal(format!("{}: {}", context, e)))
    }
}
