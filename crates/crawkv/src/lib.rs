//! Embedded, append-only key/value store for fixed-length keys over large,
//! mostly-immutable datasets.
//!
//! A database is two files: an INDEX of fixed-width records (key, value
//! offset, value length, value checksum) and a DATA file of appended value
//! blobs. Writes ([`Database::set`]) always append to both files under an
//! exclusive lock on the INDEX; reads ([`Database::get`]) take no lock and
//! search a sorted prefix of the INDEX by binary search, falling back to a
//! reverse linear scan over whatever has been appended since the last
//! [`Database::index`] call.
//!
//! ```no_run
//! use crawkv::Database;
//!
//! # fn main() -> Result<(), crawkv::CrawError> {
//! let mut db = Database::new("crawl.idx", "crawl.dat", 20)?;
//! db.set(b"https://example.com/", b"<html>...</html>")?;
//! assert_eq!(db.get(b"https://example.com/")?, Some(&b"<html>...</html>"[..]));
//! db.index()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod crc16;
mod db;
mod error;
mod header;
mod lock;
mod record;
mod reindex;
mod search;

pub use config::Config;
pub use crc16::cksum;
pub use db::Database;
pub use error::{CrawError, Result};
