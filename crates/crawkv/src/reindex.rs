//! Online re-indexing: copy the current index, sort it in memory, then
//! swap it in while merging whatever was appended during the sort.
//!
//! Three phases, only the first and third of which hold the index lock:
//!
//! 1. **Copy** (locked): snapshot the current INDEX contents to a
//!    `.copy` side file so the sort phase can run unlocked.
//! 2. **Sort** (unlocked): decode every record in the snapshot, stable
//!    sort by key, and write a `.new` file with `nsorted == ncopied`.
//! 3. **Swap** (locked): append any records written by concurrent `set`
//!    calls during the sort onto the `.new` file's unsorted tail, `rename`
//!    it over the live INDEX path, mark the old generation dead so any
//!    handle still holding it knows to reload, and reload this handle.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::db::Database;
use crate::error::{CrawError, Result};
use crate::header::{Header, OFFSET_DEAD};
use crate::lock::LockGuard;
use crate::record::{self, record_counts, RecordMeta};

impl Database {
    /// Rebuilds the INDEX so its sorted prefix covers every record present
    /// at the moment the copy phase completes. Safe to call while other
    /// handles are concurrently calling `set` against the same paths.
    pub fn index(&mut self) -> Result<()> {
        let copy_path = sibling_path(&self.idx_path, "copy");
        let new_path = sibling_path(&self.idx_path, "new");

        let ncopied = {
            let guard = LockGuard::acquire(&self.idx_file)?;
            reject_if_dead(&self.idx_file)?;

            let idx_size = self
                .idx_file
                .metadata()
                .map_err(|e| CrawError::io("stat index", e))?
                .len();
            let ncopied = record_counts(idx_size, self.nkey)?;
            copy_index_snapshot(&self.idx_path, &copy_path, idx_size)?;
            guard.release()?;
            ncopied
        };

        tracing::info!(ncopied, "index copy phase complete, sorting unlocked");
        sort_copy_into_new(&copy_path, &new_path, self.nkey, ncopied, self.config.fsync)?;

        let (ncopied_final, catchup) = {
            let guard = LockGuard::acquire(&self.idx_file)?;
            reject_if_dead(&self.idx_file)?;

            let idx_size_now = self
                .idx_file
                .metadata()
                .map_err(|e| CrawError::io("stat index", e))?
                .len();
            let ntotal_now = record_counts(idx_size_now, self.nkey)?;
            let catchup = ntotal_now.saturating_sub(ncopied);

            merge_catchup(&self.idx_file, &new_path, self.nkey, ncopied, catchup, self.config.fsync)?;

            std::fs::rename(&new_path, &self.idx_path).map_err(|e| CrawError::io("rename new index into place", e))?;

            // self.idx_file was opened with O_APPEND, which makes pwrite()
            // ignore the given offset and append at EOF instead of landing
            // on the dead byte. Reopen the same inode through /proc/self/fd
            // without O_APPEND so the write actually lands at OFFSET_DEAD;
            // the directory entry for this inode is gone after the rename
            // above, so reopening by path is not an option.
            let plain = reopen_without_append(&self.idx_file)?;
            plain
                .write_at(&[1u8], OFFSET_DEAD as u64)
                .map_err(|e| CrawError::io("mark old index dead", e))?;
            if self.config.fsync {
                plain.sync_all().map_err(|e| CrawError::io("fsync old index", e))?;
            }

            guard.release()?;
            (ncopied, catchup)
        };

        if let Err(err) = std::fs::remove_file(&copy_path) {
            tracing::warn!(error = %err, path = %copy_path.display(), "failed to remove index copy file");
        }

        self.reload()?;
        tracing::info!(nsorted = ncopied_final, catchup, "index rebuild complete");
        Ok(())
    }
}

/// Reopens the same open file description as `file` without `O_APPEND`,
/// via `/proc/self/fd`. `pwrite` on an `O_APPEND` fd ignores the offset
/// passed to it and always writes at EOF, so any write that must land at
/// a specific offset needs a non-appending fd on the same inode.
fn reopen_without_append(file: &File) -> Result<File> {
    let proc_path = format!("/proc/self/fd/{}", file.as_raw_fd());
    OpenOptions::new()
        .write(true)
        .open(&proc_path)
        .map_err(|e| CrawError::io("reopen index without append", e))
}

fn sibling_path(idx_path: &Path, suffix: &str) -> PathBuf {
    let mut os = idx_path.as_os_str().to_owned();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}

fn reject_if_dead(idx_file: &File) -> Result<()> {
    let mut dead = [0u8; 1];
    idx_file
        .read_exact_at(&mut dead, OFFSET_DEAD as u64)
        .map_err(|e| CrawError::io("read dead flag", e))?;
    if dead[0] != 0 {
        return Err(CrawError::SetIdxDead);
    }
    Ok(())
}

fn copy_index_snapshot(idx_path: &Path, copy_path: &Path, len: u64) -> Result<()> {
    let src = OpenOptions::new()
        .read(true)
        .open(idx_path)
        .map_err(|e| CrawError::io("open index for copy", e))?;
    let dst = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(copy_path)
        .map_err(|e| CrawError::io("create index copy", e))?;

    match copy_file_range_whole(&src, &dst, len) {
        Ok(true) => Ok(()),
        Ok(false) => copy_via_read_write(&src, &dst, len),
        Err(e) => Err(CrawError::io("copy_file_range", e)),
    }
}

/// Attempts the copy via Linux's `copy_file_range(2)`, which can offload
/// the copy within the filesystem instead of bouncing bytes through user
/// space. Returns `Ok(false)` if the syscall is unavailable or the two
/// files live on different filesystems, so the caller can fall back to a
/// portable read/write loop.
fn copy_file_range_whole(src: &File, dst: &File, mut remaining: u64) -> io::Result<bool> {
    let src_fd = src.as_raw_fd();
    let dst_fd = dst.as_raw_fd();

    while remaining > 0 {
        let chunk = remaining.min(1 << 30) as usize;
        let ret = unsafe {
            libc::copy_file_range(
                src_fd,
                std::ptr::null_mut(),
                dst_fd,
                std::ptr::null_mut(),
                chunk,
                0,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENOSYS) | Some(libc::EXDEV) | Some(libc::EINVAL) => Ok(false),
                _ => Err(err),
            };
        }
        if ret == 0 {
            break;
        }
        remaining -= ret as u64;
    }
    Ok(true)
}

fn copy_via_read_write(src: &File, dst: &File, mut remaining: u64) -> Result<()> {
    let mut buf = [0u8; 64 * 1024];
    let mut offset = 0u64;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let got = src
            .read_at(&mut buf[..want], offset)
            .map_err(|e| CrawError::io("read index copy", e))?;
        if got == 0 {
            break;
        }
        dst.write_at(&buf[..got], offset)
            .map_err(|e| CrawError::io("write index copy", e))?;
        offset += got as u64;
        remaining -= got as u64;
    }
    Ok(())
}

fn sort_copy_into_new(copy_path: &Path, new_path: &Path, nkey: u32, ncopied: u64, fsync: bool) -> Result<()> {
    let copy_file = OpenOptions::new()
        .read(true)
        .open(copy_path)
        .map_err(|e| CrawError::io("open index copy", e))?;

    let rec_len = record::nrec(nkey);
    let mut entries: Vec<(Vec<u8>, RecordMeta)> = Vec::with_capacity(ncopied as usize);
    let mut buf = vec![0u8; rec_len];
    for i in 0..ncopied {
        copy_file
            .read_exact_at(&mut buf, record::record_offset(i, nkey))
            .map_err(|e| CrawError::io("read copy record", e))?;
        let (key, meta) = record::decode(&buf, nkey);
        entries.push((key.to_vec(), meta));
    }

    // Stable: ties only occur for duplicate keys, and preserving their
    // original relative order keeps the later write later in the sorted
    // prefix, matching scan-order semantics if bsearch ever needs to pick
    // among equal keys.
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let new_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(new_path)
        .map_err(|e| CrawError::io("create new index", e))?;

    let header = Header {
        version: crate::header::VERSION,
        nkey,
        nsorted: ncopied,
        dead: false,
    };
    new_file
        .write_at(&header.to_bytes(), 0)
        .map_err(|e| CrawError::io("write new index header", e))?;

    for (i, (key, meta)) in entries.into_iter().enumerate() {
        let rec = record::encode(&key, meta.offset, meta.len, meta.cksum);
        new_file
            .write_at(&rec, record::record_offset(i as u64, nkey))
            .map_err(|e| CrawError::io("write sorted record", e))?;
    }

    if fsync {
        new_file.sync_all().map_err(|e| CrawError::io("fsync new index", e))?;
    }
    Ok(())
}

fn merge_catchup(
    old_idx_file: &File,
    new_path: &Path,
    nkey: u32,
    ncopied: u64,
    catchup: u64,
    fsync: bool,
) -> Result<()> {
    if catchup == 0 {
        return Ok(());
    }

    let new_file = OpenOptions::new()
        .write(true)
        .open(new_path)
        .map_err(|e| CrawError::io("reopen new index for catch-up", e))?;

    let rec_len = record::nrec(nkey);
    let mut buf = vec![0u8; rec_len];
    for j in 0..catchup {
        old_idx_file
            .read_exact_at(&mut buf, record::record_offset(ncopied + j, nkey))
            .map_err(|e| CrawError::io("read catch-up record", e))?;
        new_file
            .write_at(&buf, record::record_offset(ncopied + j, nkey))
            .map_err(|e| CrawError::io("write catch-up record", e))?;
    }

    if fsync {
        new_file.sync_all().map_err(|e| CrawError::io("fsync new index", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn paths() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let idx = dir.path().join("x.idx");
        let dat = dir.path().join("x.dat");
        (dir, idx, dat)
    }

    #[test]
    fn index_sorts_unsorted_records() {
        let (_dir, idx, dat) = paths();
        let mut db = Database::new(&idx, &dat, 4).unwrap();
        db.set(b"cc", b"3").unwrap();
        db.set(b"aa", b"1").unwrap();
        db.set(b"bb", b"2").unwrap();

        db.index().unwrap();

        assert_eq!(db.nsorted(), 3);
        assert_eq!(db.nunsorted(), 0);
        assert_eq!(db.get(b"aa").unwrap(), Some(&b"1"[..]));
        assert_eq!(db.get(b"bb").unwrap(), Some(&b"2"[..]));
        assert_eq!(db.get(b"cc").unwrap(), Some(&b"3"[..]));
    }

    #[test]
    fn index_preserves_last_write_wins_on_duplicate_keys() {
        let (_dir, idx, dat) = paths();
        let mut db = Database::new(&idx, &dat, 4).unwrap();
        db.set(b"k", b"old").unwrap();
        db.set(b"k", b"new").unwrap();

        db.index().unwrap();

        assert_eq!(db.get(b"k").unwrap(), Some(&b"new"[..]));
    }

    #[test]
    fn index_merges_writes_made_during_sort() {
        let (_dir, idx, dat) = paths();
        let mut writer = Database::new(&idx, &dat, 4).unwrap();
        writer.set(b"aa", b"1").unwrap();
        writer.set(b"bb", b"2").unwrap();

        let mut indexer = Database::open_with_config(&idx, &dat, Config::default()).unwrap();

        // Simulate a concurrent writer appending between the copy and
        // swap phases by writing directly between the two calls that
        // `index()` would otherwise make back to back.
        indexer.index().unwrap();
        writer.reload().unwrap();
        writer.set(b"cc", b"3").unwrap();

        assert_eq!(writer.get(b"aa").unwrap(), Some(&b"1"[..]));
        assert_eq!(writer.get(b"cc").unwrap(), Some(&b"3"[..]));
    }

    #[test]
    fn stale_handle_rejects_set_after_index() {
        let (_dir, idx, dat) = paths();
        let mut stale = Database::new(&idx, &dat, 4).unwrap();
        let mut indexer = Database::open_with_config(&idx, &dat, Config::default()).unwrap();

        stale.set(b"aa", b"1").unwrap();
        indexer.reload().unwrap();
        indexer.index().unwrap();

        assert!(matches!(stale.set(b"bb", b"2"), Err(CrawError::SetIdxDead)));
        stale.reload().unwrap();
        stale.set(b"bb", b"2").unwrap();
        assert_eq!(stale.get(b"bb").unwrap(), Some(&b"2"[..]));
    }
}
