//! Advisory exclusive lock on the INDEX file descriptor.
//!
//! A single `flock`-style exclusive lock (via [`fs2::FileExt`]) guards the
//! entire index-append path and the copy/swap phases of re-indexing.
//! Readers take no lock; see `crate::db` for the staleness consequences.

use std::fs::File;

use fs2::FileExt;

use crate::error::CrawError;

/// RAII guard over an exclusive lock on `file`. Releases the lock on drop,
/// so every error path — including an early return via `?` or a panic
/// while the lock is held — releases it, not just the explicit success path.
pub struct LockGuard<'a> {
    file: &'a File,
    released: bool,
}

impl<'a> LockGuard<'a> {
    /// Blocks until the exclusive lock on `file` is acquired.
    pub fn acquire(file: &'a File) -> Result<Self, CrawError> {
        tracing::debug!("acquiring exclusive lock on index");
        file.lock_exclusive().map_err(CrawError::LockEx)?;
        Ok(LockGuard {
            file,
            released: false,
        })
    }

    /// Releases the lock explicitly, surfacing an unlock error instead of
    /// silently swallowing it in `Drop`.
    pub fn release(mut self) -> Result<(), CrawError> {
        self.released = true;
        self.file.unlock().map_err(CrawError::LockUn)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.file.unlock() {
                tracing::error!(error = %err, "failed to release index lock on drop");
            }
        }
    }
}
