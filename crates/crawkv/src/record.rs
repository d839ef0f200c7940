//! Fixed-width index record: `key(nkey) | offset(8) | len(4) | cksum(2)`.

use crate::error::{CrawError, Result};
use crate::header::HEADER_SIZE;

/// Per-record overhead beyond the key: offset(8) + len(4) + cksum(2).
const REC_OVERHEAD: usize = 14;

/// Bytes occupied by one index record for a given key length.
#[must_use]
pub fn nrec(nkey: u32) -> usize {
    nkey as usize + REC_OVERHEAD
}

/// Decoded fields of an index record, excluding the key (callers that need
/// the key slice it alongside this from the raw record buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    pub offset: u64,
    pub len: u32,
    pub cksum: u16,
}

/// Derives `ntotal` from the on-disk index size, and validates the size
/// invariant `(idx_size - HEADER_SIZE) % nrec == 0`.
pub fn record_counts(idx_size: u64, nkey: u32) -> Result<u64> {
    let nrec = nrec(nkey) as u64;
    let body = idx_size
        .checked_sub(HEADER_SIZE as u64)
        .ok_or(CrawError::BadIndexSize { idx_size, nrec: nrec as usize })?;
    if body % nrec != 0 {
        return Err(CrawError::BadIndexSize {
            idx_size,
            nrec: nrec as usize,
        });
    }
    Ok(body / nrec)
}

/// Pads `key` to exactly `nkey` bytes with trailing NULs, rejecting keys of
/// length 0 or greater than `nkey`.
pub fn pad_key(key: &[u8], nkey: u32, bad_key: impl Fn(usize, u32) -> CrawError) -> Result<Vec<u8>> {
    if key.is_empty() || key.len() > nkey as usize {
        return Err(bad_key(key.len(), nkey));
    }
    let mut padded = vec![0u8; nkey as usize];
    padded[..key.len()].copy_from_slice(key);
    Ok(padded)
}

/// Encodes a full index record: `padded_key | offset | len | cksum`.
pub fn encode(padded_key: &[u8], offset: u64, len: u32, cksum: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(padded_key.len() + REC_OVERHEAD);
    buf.extend_from_slice(padded_key);
    buf.extend_from_slice(&offset.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&cksum.to_le_bytes());
    buf
}

/// Splits a raw `nrec`-byte record into its key slice and decoded metadata.
///
/// # Panics
///
/// Panics if `buf.len() != nkey as usize + 14`; callers always read exactly
/// one record's worth of bytes, so a mismatch is a programming error.
pub fn decode(buf: &[u8], nkey: u32) -> (&[u8], RecordMeta) {
    let nkey = nkey as usize;
    assert_eq!(buf.len(), nkey + REC_OVERHEAD);

    let key = &buf[..nkey];
    let offset = u64::from_le_bytes(buf[nkey..nkey + 8].try_into().unwrap());
    let len = u32::from_le_bytes(buf[nkey + 8..nkey + 12].try_into().unwrap());
    let cksum = u16::from_le_bytes(buf[nkey + 12..nkey + 14].try_into().unwrap());

    (key, RecordMeta { offset, len, cksum })
}

/// Byte offset of record `i` (0-based) within the INDEX file.
#[must_use]
pub fn record_offset(i: u64, nkey: u32) -> u64 {
    HEADER_SIZE as u64 + i * nrec(nkey) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let padded = pad_key(b"key1", 8, |len, nkey| CrawError::SetBadKey { len, nkey }).unwrap();
        let buf = encode(&padded, 42, 5, 0xBEEF);
        let (key, meta) = decode(&buf, 8);
        assert_eq!(key, b"key1\0\0\0\0");
        assert_eq!(meta.offset, 42);
        assert_eq!(meta.len, 5);
        assert_eq!(meta.cksum, 0xBEEF);
    }

    #[test]
    fn rejects_empty_and_oversized_keys() {
        let err = |len, nkey| CrawError::SetBadKey { len, nkey };
        assert!(pad_key(b"", 4, err).is_err());
        assert!(pad_key(b"toolong", 4, err).is_err());
        assert!(pad_key(b"ok", 4, err).is_ok());
        assert!(pad_key(b"fits", 4, err).is_ok());
    }

    #[test]
    fn record_counts_validates_size_invariant() {
        let nkey = 4;
        let nrec = nrec(nkey) as u64;
        assert_eq!(record_counts(HEADER_SIZE as u64, nkey).unwrap(), 0);
        assert_eq!(record_counts(HEADER_SIZE as u64 + nrec, nkey).unwrap(), 1);
        assert!(record_counts(HEADER_SIZE as u64 + 1, nkey).is_err());
    }
}
