//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use burrowdb_core::{DbConfig, EnvConfig, Environment, InsertFlags};
use std::path::PathBuf;
use tempfile::TempDir;

/// Small pages so that a few hundred keys already build a multi-level tree.
pub const SMALL_PAGE: u32 = 1024;

pub fn memory_env() -> Environment {
    Environment::create_in_memory(EnvConfig::new().page_size(SMALL_PAGE)).unwrap()
}

pub fn txn_env() -> Environment {
    Environment::create_in_memory(
        EnvConfig::new()
            .page_size(SMALL_PAGE)
            .enable_transactions(true),
    )
    .unwrap()
}

/// An on-disk environment in a fresh temporary directory.
pub struct TempEnv {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TempEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.brw");
        Self { dir, path }
    }

    pub fn create(&self, config: EnvConfig) -> Environment {
        Environment::create(&self.path, config).unwrap()
    }

    pub fn open(&self, config: EnvConfig) -> Environment {
        Environment::open(&self.path, config).unwrap()
    }
}

pub fn dup_config() -> DbConfig {
    DbConfig::new().enable_duplicate_keys(true)
}

pub fn key(i: u32) -> [u8; 4] {
    i.to_be_bytes()
}

/// Inserts `keys` with records equal to the key bytes.
pub fn fill(db: &burrowdb_core::Database, keys: impl IntoIterator<Item = u32>) {
    for i in keys {
        db.insert(None, &key(i), &key(i), InsertFlags::NONE).unwrap();
    }
}
