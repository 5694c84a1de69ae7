//! # burrowdb storage
//!
//! Random-access storage backends for burrowdb.
//!
//! This crate provides the lowest-level storage abstraction for burrowdb.
//! Backends are **opaque byte stores** addressed by offset - they know
//! nothing about pages, B-trees or the file header.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, write, resize, flush)
//! - No knowledge of burrowdb page layout or transforms
//! - Must be `Send + Sync` for concurrent access
//! - The core crate owns all format interpretation
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and in-memory environments
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use burrowdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(0, b"hello world").unwrap();
//! let data = backend.read_at(6, 5).unwrap();
//! assert_eq!(&data, b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
