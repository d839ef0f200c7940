//! Durability policy for the engine.
//!
//! Separate from the index header's `nkey`, which is a file-format
//! invariant fixed for the lifetime of a database. `Config` only controls
//! caller-visible policy that does not change what is stored on disk.

/// Configuration applied when opening or creating a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Call `fsync` on both files after every `set` and at each locked
    /// phase of `index`. Defaults to `false`, matching the original
    /// engine's behavior: durability under power loss is not guaranteed
    /// unless a caller opts in.
    pub fsync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config { fsync: false }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}
