//! Error types returned by the storage engine.

use std::io;

/// Errors surfaced by the `crawkv` engine.
///
/// Every I/O call site gets its own `op` tag inside [`CrawError::Io`] rather
/// than a fresh variant per syscall, so callers can still distinguish
/// `lseek` from `rename` failures without an enum explosion.
#[derive(thiserror::Error, Debug)]
pub enum CrawError {
    #[error("key length {len} invalid for set: must be 1..={nkey}")]
    SetBadKey { len: usize, nkey: u32 },

    #[error("key length {len} invalid for get: must be 1..={nkey}")]
    GetBadKey { len: usize, nkey: u32 },

    #[error("index header magic mismatch, expected \"CRAW\"")]
    OpenBadHeader,

    #[error("index header version {found} unsupported, expected 1")]
    OpenBadVersion { found: u8 },

    #[error("index key length is zero, which cannot form valid records")]
    OpenZeroNkey,

    #[error("index file size {idx_size} is not header(18) + n*nrec({nrec})")]
    BadIndexSize { idx_size: u64, nrec: usize },

    #[error("nsorted ({nsorted}) exceeds ntotal ({ntotal})")]
    BadNsorted { nsorted: u64, ntotal: u64 },

    #[error("checksum mismatch reading value at offset {offset}")]
    DataChecksum { offset: u64 },

    #[error("short read of value at offset {offset}: expected {expected} bytes, got {got}")]
    DataRead {
        offset: u64,
        expected: u32,
        got: usize,
    },

    #[error("io error during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to acquire exclusive lock on index: {0}")]
    LockEx(#[source] io::Error),

    #[error("failed to release lock on index: {0}")]
    LockUn(#[source] io::Error),

    #[error("index is marked dead; caller must reload and retry")]
    SetIdxDead,
}

impl CrawError {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        CrawError::Io { op, source }
    }
}

pub type Result<T> = std::result::Result<T, CrawError>;
