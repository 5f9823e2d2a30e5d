//! The on-disk coverage database: a versioned, checksummed binary codec.
//!
//! The format is endian-independent (everything big-endian on the wire) and
//! deliberately simple: a fixed header followed by fixed-width records to
//! end of file. Only addresses with at least one recorded hit are encoded,
//! so the database size is proportional to exercised code, not total code.
//!
//! ```text
//! Header (16 bytes):
//!   u32 magic      = 0x6b636f76 ("kcov")
//!   u32 version    = 5
//!   u64 checksum     identity of the analyzed binary
//! Record (32 bytes, repeated to EOF):
//!   u64 address_or_offset
//!   u64 module_hash_or_zero
//!   u64 segment_index
//!   u64 hit_count
//! ```
//!
//! Validation is all-or-nothing: a header mismatch rejects the entire load.
//! A trailing partial record is treated as corruption and ignored.

use bytes::{Buf, BufMut};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{CovmapError, Result};

/// Magic constant identifying the database format ("kcov").
pub const DB_MAGIC: u32 = 0x6b63_6f76;
/// Current database format version.
pub const DB_VERSION: u32 = 5;
/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 16;
/// Size of one encoded record in bytes.
pub const RECORD_SIZE: usize = 32;

/// One persisted coverage fact.
///
/// For main-binary addresses `module` is 0 and `address` is absolute. For
/// relocated modules `address` is the offset into the segment identified by
/// `segment_index`, and `module` is the stable hash of the module's path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Absolute address, or segment-relative offset for module records.
    pub address: u64,
    /// Stable module identifier, 0 for the main binary.
    pub module: u64,
    /// Index into the module's segment list.
    pub segment_index: u64,
    /// Recorded hit count.
    pub hits: u64,
}

/// Encode a record set into the on-disk format.
///
/// The buffer is reserved up front with `try_reserve_exact`, so an
/// allocation failure surfaces as [`CovmapError::AllocationFailed`] instead
/// of aborting the monitored process.
pub fn encode(checksum: u64, records: &[Record]) -> Result<Vec<u8>> {
    let size = HEADER_SIZE + records.len() * RECORD_SIZE;
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| CovmapError::AllocationFailed { bytes: size })?;

    buf.put_u32(DB_MAGIC);
    buf.put_u32(DB_VERSION);
    buf.put_u64(checksum);
    for record in records {
        buf.put_u64(record.address);
        buf.put_u64(record.module);
        buf.put_u64(record.segment_index);
        buf.put_u64(record.hits);
    }

    Ok(buf)
}

/// Decode a database image, validating magic, version, and checksum.
///
/// Any header mismatch fails the whole decode; no records are returned.
pub fn decode(data: &[u8], expected_checksum: u64) -> Result<Vec<Record>> {
    let mut buf = data;
    if buf.remaining() < HEADER_SIZE {
        return Err(CovmapError::TruncatedHeader { len: data.len() });
    }

    let magic = buf.get_u32();
    if magic != DB_MAGIC {
        return Err(CovmapError::BadMagic { found: magic });
    }
    let version = buf.get_u32();
    if version != DB_VERSION {
        return Err(CovmapError::VersionMismatch {
            found: version,
            expected: DB_VERSION,
        });
    }
    let checksum = buf.get_u64();
    if checksum != expected_checksum {
        return Err(CovmapError::ChecksumMismatch {
            found: checksum,
            expected: expected_checksum,
        });
    }

    // Trailing partial record: corruption, ignored
    let count = buf.remaining() / RECORD_SIZE;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(Record {
            address: buf.get_u64(),
            module: buf.get_u64(),
            segment_index: buf.get_u64(),
            hits: buf.get_u64(),
        });
    }

    Ok(records)
}

/// Read and decode the database at `path`.
pub fn load(path: &Path, expected_checksum: u64) -> Result<Vec<Record>> {
    let data = fs::read(path)?;
    let records = decode(&data, expected_checksum)?;
    debug!(
        path = %path.display(),
        records = records.len(),
        "Loaded coverage database"
    );
    Ok(records)
}

/// Encode and write the database to `path`.
pub fn store(path: &Path, checksum: u64, records: &[Record]) -> Result<()> {
    let data = encode(checksum, records)?;
    fs::write(path, data)?;
    debug!(
        path = %path.display(),
        records = records.len(),
        "Wrote coverage database"
    );
    Ok(())
}
