//! B+tree index of one database.
//!
//! - [`node`]: node page encoding
//! - [`blob`]: overflow chains for large records and duplicate tables
//! - [`tree`]: search, modification and structural repair

mod blob;
mod node;
mod tree;

pub(crate) use node::EntryValue;
pub(crate) use tree::{BTree, Seek, TreeReport};
