//! Paged file layer.
//!
//! - [`store`]: superblock and fixed-size page slots over a storage backend
//! - [`transform`]: per-page encoding (CRC32 trailer, encryption, custom)
//! - [`cache`]: LRU cache of decoded pages
//! - [`pager`]: allocation, freelist, header page and write batches

mod cache;
mod pager;
mod store;
mod transform;

pub use transform::PageTransform;

pub(crate) use pager::{read_u32, read_u64, Pager, PagerGauges};
pub(crate) use store::{PageStore, StoreOptions};

/// Type tag stored in the first byte of every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PageType {
    Header = 1,
    Leaf = 2,
    Internal = 3,
    Blob = 4,
    Free = 5,
}

impl PageType {
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Header),
            2 => Some(Self::Leaf),
            3 => Some(Self::Internal),
            4 => Some(Self::Blob),
            5 => Some(Self::Free),
            _ => None,
        }
    }
}
