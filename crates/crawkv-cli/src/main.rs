//! Command-line driver for crawkv databases.
//!
//! ```bash
//! crawkv init --path-idx crawl.idx --path-dat crawl.dat --key-size 32
//! crawkv set --path-idx crawl.idx --path-dat crawl.dat --key k --val v
//! crawkv get --path-idx crawl.idx --path-dat crawl.dat --key k
//! crawkv index --path-idx crawl.idx --path-dat crawl.dat
//! ```

use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crawkv::Database;

#[derive(Parser)]
#[command(name = "crawkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty database.
    Init {
        #[arg(short = 'i', long = "path-idx")]
        path_idx: String,

        #[arg(short = 'd', long = "path-dat")]
        path_dat: String,

        /// Fixed key size in bytes.
        #[arg(short = 'n', long = "key-size", default_value_t = 32)]
        key_size: u32,
    },

    /// Write a key/value pair.
    Set {
        #[arg(short = 'i', long = "path-idx")]
        path_idx: String,

        #[arg(short = 'd', long = "path-dat")]
        path_dat: String,

        #[arg(short = 'k', long)]
        key: String,

        #[arg(short = 'v', long)]
        val: String,
    },

    /// Read a value by key.
    Get {
        #[arg(short = 'i', long = "path-idx")]
        path_idx: String,

        #[arg(short = 'd', long = "path-dat")]
        path_dat: String,

        #[arg(short = 'k', long)]
        key: String,
    },

    /// Rebuild the index's sorted prefix.
    Index {
        #[arg(short = 'i', long = "path-idx")]
        path_idx: String,

        #[arg(short = 'd', long = "path-dat")]
        path_dat: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            path_idx,
            path_dat,
            key_size,
        } => run_init(&path_idx, &path_dat, key_size),
        Commands::Set {
            path_idx,
            path_dat,
            key,
            val,
        } => run_set(&path_idx, &path_dat, key.as_bytes(), val.as_bytes()),
        Commands::Get {
            path_idx,
            path_dat,
            key,
        } => run_get(&path_idx, &path_dat, key.as_bytes()),
        Commands::Index { path_idx, path_dat } => run_index(&path_idx, &path_dat),
    }
}

fn run_init(path_idx: &str, path_dat: &str, key_size: u32) -> Result<()> {
    if key_size == 0 {
        bail!("--key-size must be greater than zero");
    }
    Database::new(path_idx, path_dat, key_size).context("failed to create database")?;
    println!("initialized {path_idx} / {path_dat} (key size {key_size})");
    Ok(())
}

fn run_set(path_idx: &str, path_dat: &str, key: &[u8], val: &[u8]) -> Result<()> {
    let mut db = Database::open(path_idx, path_dat).context("failed to open database")?;
    db.set(key, val).context("failed to set key")?;
    Ok(())
}

fn run_get(path_idx: &str, path_dat: &str, key: &[u8]) -> Result<()> {
    let mut db = Database::open(path_idx, path_dat).context("failed to open database")?;
    match db.get(key).context("failed to get key")? {
        Some(val) => {
            std::io::stdout().write_all(val)?;
            Ok(())
        }
        None => bail!("key not found"),
    }
}

fn run_index(path_idx: &str, path_dat: &str) -> Result<()> {
    let mut db = Database::open(path_idx, path_dat).context("failed to open database")?;
    db.index().context("failed to rebuild index")?;
    println!("index rebuilt: nsorted={} ntotal={}", db.nsorted(), db.ntotal());
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;

    fn paths() -> (tempfile::TempDir, String, String) {
        let dir = tempfile::tempdir().unwrap();
        let idx = dir.path().join("x.idx").to_str().unwrap().to_owned();
        let dat = dir.path().join("x.dat").to_str().unwrap().to_owned();
        (dir, idx, dat)
    }

    #[test]
    fn init_set_get_round_trip() {
        let (_dir, idx, dat) = paths();

        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["init", "--path-idx", &idx, "--path-dat", &dat, "--key-size", "8"])
            .assert()
            .success();

        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["set", "--path-idx", &idx, "--path-dat", &dat, "--key", "hello", "--val", "world"])
            .assert()
            .success();

        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["get", "--path-idx", &idx, "--path-dat", &dat, "--key", "hello"])
            .assert()
            .success()
            .stdout(predicate::eq("world"));
    }

    #[test]
    fn get_missing_key_fails() {
        let (_dir, idx, dat) = paths();
        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["init", "--path-idx", &idx, "--path-dat", &dat])
            .assert()
            .success();

        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["get", "--path-idx", &idx, "--path-dat", &dat, "--key", "nope"])
            .assert()
            .failure();
    }

    #[test]
    fn index_rebuilds_after_writes() {
        let (_dir, idx, dat) = paths();
        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["init", "--path-idx", &idx, "--path-dat", &dat])
            .assert()
            .success();

        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["set", "--path-idx", &idx, "--path-dat", &dat, "--key", "a", "--val", "1"])
            .assert()
            .success();

        Command::cargo_bin("crawkv")
            .unwrap()
            .args(["index", "--path-idx", &idx, "--path-dat", &dat])
            .assert()
            .success()
            .stdout(predicate::str::contains("nsorted=1"));
    }
}
