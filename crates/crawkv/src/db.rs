//! The `Database` handle: open/create lifecycle plus `set`/`get`.
//!
//! Re-indexing (`Database::index`) lives in `crate::reindex` as a second
//! `impl Database` block, built directly on the fields defined here.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::crc16;
use crate::error::{CrawError, Result};
use crate::header::{Header, HEADER_SIZE, OFFSET_DEAD};
use crate::lock::LockGuard;
use crate::record::{self, record_counts};
use crate::search;

/// An open crawkv database: one INDEX file and one DATA file.
///
/// Cheap to keep around for the lifetime of a process; `set` and `get`
/// reuse the open file descriptors and a small scratch buffer rather than
/// reopening files per call.
pub struct Database {
    pub(crate) idx_path: PathBuf,
    pub(crate) dat_path: PathBuf,
    pub(crate) idx_file: File,
    pub(crate) dat_file: File,
    pub(crate) config: Config,
    pub(crate) nkey: u32,
    pub(crate) nsorted: u64,
    pub(crate) nunsorted: u64,
    pub(crate) ntotal: u64,
    pub(crate) idx_size: u64,
    val_buf: Vec<u8>,
}

impl Database {
    /// Creates a new, empty database at `idx_path`/`dat_path`, truncating
    /// any existing files at those paths.
    pub fn new(idx_path: impl Into<PathBuf>, dat_path: impl Into<PathBuf>, nkey: u32) -> Result<Self> {
        Self::new_with_config(idx_path, dat_path, nkey, Config::default())
    }

    pub fn new_with_config(
        idx_path: impl Into<PathBuf>,
        dat_path: impl Into<PathBuf>,
        nkey: u32,
        config: Config,
    ) -> Result<Self> {
        let idx_path = idx_path.into();
        let dat_path = dat_path.into();

        if nkey == 0 {
            return Err(CrawError::OpenZeroNkey);
        }

        tracing::info!(idx = %idx_path.display(), dat = %dat_path.display(), nkey, "creating new database");

        let mut idx_file = open_rw(&idx_path, true, true)?;
        let dat_file = open_rw(&dat_path, true, true)?;

        let header = Header::fresh(nkey);
        idx_file
            .write_all(&header.to_bytes())
            .map_err(|e| CrawError::io("write header", e))?;
        if config.fsync {
            idx_file.sync_all().map_err(|e| CrawError::io("fsync index", e))?;
            dat_file.sync_all().map_err(|e| CrawError::io("fsync data", e))?;
        }

        Ok(Database {
            idx_path,
            dat_path,
            idx_file,
            dat_file,
            config,
            nkey,
            nsorted: 0,
            nunsorted: 0,
            ntotal: 0,
            idx_size: HEADER_SIZE as u64,
            val_buf: Vec::new(),
        })
    }

    /// Opens an existing database, validating the header and the index
    /// file's size invariant.
    pub fn open(idx_path: impl Into<PathBuf>, dat_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(idx_path, dat_path, Config::default())
    }

    pub fn open_with_config(
        idx_path: impl Into<PathBuf>,
        dat_path: impl Into<PathBuf>,
        config: Config,
    ) -> Result<Self> {
        let idx_path = idx_path.into();
        let dat_path = dat_path.into();

        tracing::info!(idx = %idx_path.display(), dat = %dat_path.display(), "opening database");

        // `create(true)` mirrors the original engine: opening a path that
        // does not exist yet creates an empty file, which then fails the
        // header read below rather than failing at `open()` itself.
        let idx_file = open_rw(&idx_path, true, false)?;
        let dat_file = open_rw(&dat_path, true, false)?;

        let header = read_header(&idx_file)?;
        let idx_size = idx_file
            .metadata()
            .map_err(|e| CrawError::io("stat index", e))?
            .len();
        let ntotal = record_counts(idx_size, header.nkey)?;
        if header.nsorted > ntotal {
            return Err(CrawError::BadNsorted {
                nsorted: header.nsorted,
                ntotal,
            });
        }

        Ok(Database {
            idx_path,
            dat_path,
            idx_file,
            dat_file,
            config,
            nkey: header.nkey,
            nsorted: header.nsorted,
            nunsorted: ntotal - header.nsorted,
            ntotal,
            idx_size,
            val_buf: Vec::new(),
        })
    }

    /// Re-opens both files and re-reads the header, picking up changes made
    /// by a concurrent `index()` (including the post-swap file identity).
    pub fn reload(&mut self) -> Result<()> {
        tracing::debug!(idx = %self.idx_path.display(), "reloading database");
        let reopened = Self::open_with_config(self.idx_path.clone(), self.dat_path.clone(), self.config)?;
        *self = reopened;
        Ok(())
    }

    /// Appends `val` to the DATA file and its index record to the INDEX
    /// file, under the exclusive index lock.
    ///
    /// Fails with [`CrawError::SetIdxDead`] if this handle's INDEX file has
    /// been superseded by a completed `index()` swap; call [`Self::reload`]
    /// and retry.
    pub fn set(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        let padded = record::pad_key(key, self.nkey, |len, nkey| CrawError::SetBadKey { len, nkey })?;
        let cksum = crc16::cksum(val);

        let guard = LockGuard::acquire(&self.idx_file)?;

        let mut dead = [0u8; 1];
        self.idx_file
            .read_exact_at(&mut dead, OFFSET_DEAD as u64)
            .map_err(|e| CrawError::io("read dead flag", e))?;
        if dead[0] != 0 {
            return Err(CrawError::SetIdxDead);
        }

        let offset = self
            .dat_file
            .metadata()
            .map_err(|e| CrawError::io("stat data", e))?
            .len();
        self.dat_file
            .write_all(val)
            .map_err(|e| CrawError::io("write data", e))?;
        if self.config.fsync {
            self.dat_file.sync_all().map_err(|e| CrawError::io("fsync data", e))?;
        }

        let rec = record::encode(&padded, offset, val.len() as u32, cksum);
        self.idx_file
            .write_all(&rec)
            .map_err(|e| CrawError::io("write index record", e))?;
        if self.config.fsync {
            self.idx_file.sync_all().map_err(|e| CrawError::io("fsync index", e))?;
        }

        self.ntotal += 1;
        self.nunsorted += 1;
        self.idx_size += record::nrec(self.nkey) as u64;

        guard.release()?;
        tracing::debug!(offset, len = val.len(), "appended record");
        Ok(())
    }

    /// Looks up `key`: binary search over the sorted prefix, then a
    /// reverse linear scan over the unsorted tail. Takes no lock, so a
    /// concurrent `set` may or may not be visible to this call.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<&[u8]>> {
        if key.is_empty() || key.len() > self.nkey as usize {
            return Err(CrawError::GetBadKey {
                len: key.len(),
                nkey: self.nkey,
            });
        }
        let padded = record::pad_key(key, self.nkey, |len, nkey| CrawError::GetBadKey { len, nkey })?;

        let meta = match search::bsearch_sorted(&self.idx_file, self.nkey, self.nsorted, &padded)? {
            Some(meta) => Some(meta),
            None => search::lsearch_unsorted(&self.idx_file, self.nkey, self.nsorted, self.nunsorted, &padded)?,
        };
        let meta = match meta {
            Some(meta) => meta,
            None => return Ok(None),
        };

        if self.val_buf.len() < meta.len as usize {
            self.val_buf.resize(meta.len as usize, 0);
        }
        let got = read_value(&self.dat_file, &mut self.val_buf[..meta.len as usize], meta.offset)?;
        if got != meta.len as usize {
            return Err(CrawError::DataRead {
                offset: meta.offset,
                expected: meta.len,
                got,
            });
        }

        let cksum = crc16::cksum(&self.val_buf[..meta.len as usize]);
        if cksum != meta.cksum {
            tracing::warn!(offset = meta.offset, "value checksum mismatch");
            return Err(CrawError::DataChecksum { offset: meta.offset });
        }

        Ok(Some(&self.val_buf[..meta.len as usize]))
    }

    /// Key length this database was created with.
    pub fn nkey(&self) -> u32 {
        self.nkey
    }

    /// Total number of index records, sorted and unsorted.
    pub fn ntotal(&self) -> u64 {
        self.ntotal
    }

    /// Number of records in the sorted prefix.
    pub fn nsorted(&self) -> u64 {
        self.nsorted
    }

    /// Number of records in the unsorted tail.
    pub fn nunsorted(&self) -> u64 {
        self.nunsorted
    }

    pub fn idx_path(&self) -> &Path {
        &self.idx_path
    }

    pub fn dat_path(&self) -> &Path {
        &self.dat_path
    }

    /// Closes the handle. Equivalent to dropping it; provided so callers
    /// that mirror the original library's explicit lifecycle have a named
    /// call site.
    pub fn free(self) {}
}

fn open_rw(path: &Path, create: bool, truncate: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .append(true)
        .create(create)
        .truncate(truncate)
        .open(path)
        .map_err(|e| CrawError::io("open", e))
}

fn read_header(idx_file: &File) -> Result<Header> {
    let mut buf = [0u8; HEADER_SIZE];
    match idx_file.read_exact_at(&mut buf, 0) {
        Ok(()) => Header::from_bytes(&buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CrawError::OpenBadHeader),
        Err(e) => Err(CrawError::io("read header", e)),
    }
}

fn read_value(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut total = 0usize;
    while total < buf.len() {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CrawError::io("read data value", e)),
        }
    }
    Ok(total)
}
