//! Error types for the covmap coverage aggregator.
//!
//! This module provides structured error handling using thiserror. Database
//! validation failures carry the offending values so callers can log them;
//! the Reporter itself treats every load failure as "no prior data".

use thiserror::Error;

/// Main error type for covmap operations.
#[derive(Debug, Error)]
pub enum CovmapError {
    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database file does not start with the expected magic constant
    #[error("Bad database magic: {found:#x}")]
    BadMagic { found: u32 },

    /// Database was written by an incompatible format version
    #[error("Database version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    /// Database was produced for a different binary
    #[error("Checksum mismatch: found {found:#x}, expected {expected:#x}")]
    ChecksumMismatch { found: u64, expected: u64 },

    /// Database is too short to hold a header
    #[error("Truncated database header: {len} bytes")]
    TruncatedHeader { len: usize },

    /// The serialization buffer could not be allocated
    #[error("Allocation of {bytes} bytes failed")]
    AllocationFailed { bytes: usize },
}

/// Result type alias for covmap operations
pub type Result<T> = std::result::Result<T, CovmapError>;
