//! # burrowdb core
//!
//! Embedded, transactional B-tree key/value engine.
//!
//! An [`Environment`] owns one backing file (or an in-memory store) holding
//! any number of [`Database`]s, each an ordered B+tree keyed by a 16-bit
//! name. This crate provides:
//!
//! - Page store with CRC32 or AES-256-GCM page transforms and a freelist
//! - LRU page cache with atomic write batches
//! - B+tree with blob overflow, duplicate keys and record-number keys
//! - Pluggable key comparison through a shared [`Context`]
//! - Bidirectional [`Cursor`]s over a merged transactional view
//! - [`Transaction`]s with key-level conflict detection
//! - UQI aggregate queries ([`Environment::select`])
//!
//! ## Example
//!
//! ```rust
//! use burrowdb_core::{DbConfig, EnvConfig, Environment, InsertFlags};
//!
//! let env = Environment::create_in_memory(EnvConfig::default()).unwrap();
//! let db = env.create_db(1, DbConfig::default()).unwrap();
//! db.insert(None, b"hello", b"world", InsertFlags::NONE).unwrap();
//! assert_eq!(db.find(None, b"hello").unwrap(), b"world");
//!
//! let count = env.select("COUNT($key) FROM DATABASE 1").unwrap();
//! assert_eq!(count.record_u64(0), Some(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod btree;
mod catalog;
mod compare;
mod config;
mod context;
mod crypto;
mod cursor;
mod db;
mod env;
mod error;
mod page;
mod stats;
mod txn;
mod types;
mod uqi;
mod view;

pub use config::{
    flags, max_key_size, param, validate_page_size, DbConfig, EnvConfig, DEFAULT_CACHE_SIZE,
    DEFAULT_PAGE_SIZE, KEY_SIZE_UNLIMITED, MAX_PAGE_SIZE, RECORD_SIZE_UNLIMITED,
};
pub use context::{compare_fn, predicate_fn, CompareFn, Context, ErrorHandler, PredicateFn};
pub use cursor::{Cursor, CursorMove, MoveFlags};
pub use db::{Database, InsertFlags, IntegrityReport, MatchMode};
pub use env::{EnvInfo, Environment};
pub use error::{BoxError, CoreError, CoreResult, ErrorCategory, ErrorCode};
pub use page::PageTransform;
pub use stats::{EnvMetrics, MetricsSnapshot};
pub use txn::{Transaction, TxnStatus};
pub use types::{DbId, KeyType, PageId, RecordType, TxnId, MAX_DB_NAME, MIN_DB_NAME};
pub use uqi::{UqiResult, UqiRow};
