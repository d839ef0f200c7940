//! Two-phase key lookup: binary search over the sorted prefix, then a
//! reverse linear scan over the unsorted tail.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::{CrawError, Result};
use crate::record::{decode, nrec, record_offset, RecordMeta};

/// Binary searches the first `nsorted` records for `key`.
///
/// Bounds are tracked as `i64` rather than the unsigned counters used
/// elsewhere in the engine: an inclusive-bounds bisection that narrows
/// `end = mid - 1` underflows a `u64` the moment `mid` is `0`, which the
/// original C implementation did not guard against. Signed bounds make
/// that arithmetically impossible instead of relying on an explicit
/// zero-check at every step.
pub fn bsearch_sorted(
    idx_file: &File,
    nkey: u32,
    nsorted: u64,
    key: &[u8],
) -> Result<Option<RecordMeta>> {
    if nsorted == 0 {
        return Ok(None);
    }

    let rec_len = nrec(nkey);
    let mut buf = vec![0u8; rec_len];
    let mut start: i64 = 0;
    let mut end: i64 = nsorted as i64 - 1;

    while end >= start {
        let look = start + (end - start) / 2;
        let pos = record_offset(look as u64, nkey);
        read_exact_at(idx_file, &mut buf, pos, "bsearch")?;

        let (rec_key, meta) = decode(&buf, nkey);
        match rec_key.cmp(key) {
            std::cmp::Ordering::Equal => return Ok(Some(meta)),
            std::cmp::Ordering::Less => start = look + 1,
            std::cmp::Ordering::Greater => end = look - 1,
        }
    }

    Ok(None)
}

/// Reverse linear scan over the `nunsorted` tail records (most recent
/// write first), so a duplicate key shadows older writes of the same key.
pub fn lsearch_unsorted(
    idx_file: &File,
    nkey: u32,
    nsorted: u64,
    nunsorted: u64,
    key: &[u8],
) -> Result<Option<RecordMeta>> {
    if nunsorted == 0 {
        return Ok(None);
    }

    let rec_len = nrec(nkey);
    let mut buf = vec![0u8; rec_len];

    for look in (0..nunsorted).rev() {
        let pos = record_offset(nsorted + look, nkey);
        read_exact_at(idx_file, &mut buf, pos, "lsearch")?;

        let (rec_key, meta) = decode(&buf, nkey);
        if rec_key == key {
            return Ok(Some(meta));
        }
    }

    Ok(None)
}

fn read_exact_at(file: &File, buf: &mut [u8], offset: u64, op: &'static str) -> Result<()> {
    file.read_exact_at(buf, offset)
        .map_err(|source| CrawError::io(op, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;
    use crate::record::{encode, pad_key};
    use std::io::Write;

    fn build_index(nkey: u32, keys_sorted: &[&[u8]], keys_unsorted: &[&[u8]]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.idx");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        let header = Header {
            version: 1,
            nkey,
            nsorted: keys_sorted.len() as u64,
            dead: false,
        };
        file.write_all(&header.to_bytes()).unwrap();

        let mut offset = 0u64;
        for k in keys_sorted.iter().chain(keys_unsorted.iter()) {
            let padded = pad_key(k, nkey, |len, nkey| CrawError::SetBadKey { len, nkey }).unwrap();
            let rec = encode(&padded, offset, 1, 0);
            file.write_all(&rec).unwrap();
            offset += 1;
        }

        (dir, path)
    }

    #[test]
    fn finds_key_in_sorted_prefix() {
        let (_dir, path) = build_index(4, &[b"aaaa", b"bbbb", b"cccc"], &[]);
        let file = std::fs::File::open(&path).unwrap();
        let padded = pad_key(b"bbbb", 4, |len, nkey| CrawError::SetBadKey { len, nkey }).unwrap();
        let found = bsearch_sorted(&file, 4, 3, &padded).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn missing_key_in_sorted_prefix_is_none() {
        let (_dir, path) = build_index(4, &[b"aaaa", b"cccc"], &[]);
        let file = std::fs::File::open(&path).unwrap();
        let padded = pad_key(b"bbbb", 4, |len, nkey| CrawError::SetBadKey { len, nkey }).unwrap();
        assert!(bsearch_sorted(&file, 4, 2, &padded).unwrap().is_none());
    }

    #[test]
    fn empty_sorted_prefix_short_circuits() {
        let (_dir, path) = build_index(4, &[], &[]);
        let file = std::fs::File::open(&path).unwrap();
        let padded = pad_key(b"aaaa", 4, |len, nkey| CrawError::SetBadKey { len, nkey }).unwrap();
        assert!(bsearch_sorted(&file, 4, 0, &padded).unwrap().is_none());
    }

    #[test]
    fn zero_nunsorted_does_not_underflow() {
        let (_dir, path) = build_index(4, &[b"aaaa"], &[]);
        let file = std::fs::File::open(&path).unwrap();
        let padded = pad_key(b"aaaa", 4, |len, nkey| CrawError::SetBadKey { len, nkey }).unwrap();
        assert!(lsearch_unsorted(&file, 4, 1, 0, &padded).unwrap().is_none());
    }

    #[test]
    fn unsorted_scan_prefers_most_recent_duplicate() {
        let (_dir, path) = build_index(4, &[], &[b"dupe", b"dupe"]);
        let file = std::fs::File::open(&path).unwrap();
        let padded = pad_key(b"dupe", 4, |len, nkey| CrawError::SetBadKey { len, nkey }).unwrap();
        let meta = lsearch_unsorted(&file, 4, 0, 2, &padded).unwrap().unwrap();
        // Second write (index 1, offset 1) shadows the first.
        assert_eq!(meta.offset, 1);
    }
}
