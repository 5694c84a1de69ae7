//! Node encoding.
//!
//! Every node starts with an 8-byte header:
//!
//! ```text
//! | type (1) | pad (1) | count (2) | pad (4) |
//! ```
//!
//! Leaves follow it with `prev (8) | next (8)` sibling links and `count`
//! entries:
//!
//! ```text
//! | key_len (2) | key | tag (1) | value |
//!
//! tag 0: | record_count (4) | record ... |
//!        record: | 0 | len (4) | bytes |   inline
//!                | 1 | head (8) | len (8) | blob chain
//! tag 1: | head (8) | record_count (4) |   duplicate table blob
//! ```
//!
//! Internal nodes follow it with the first child and `count` separators:
//!
//! ```text
//! | child0 (8) | key_len (2) | key | child (8) | ...
//! ```

use crate::error::{CoreError, CoreResult};
use crate::page::{read_u32, read_u64, PageType};
use crate::types::PageId;

pub(crate) const NODE_HEADER: usize = 8;
pub(crate) const LEAF_HEADER: usize = NODE_HEADER + 16;
pub(crate) const INTERNAL_HEADER: usize = NODE_HEADER + 8;

/// One stored record of a leaf entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoredRecord {
    Inline(Vec<u8>),
    Blob { head: PageId, len: u64 },
}

impl StoredRecord {
    fn encoded_size(&self) -> usize {
        match self {
            Self::Inline(bytes) => 1 + 4 + bytes.len(),
            Self::Blob { .. } => 1 + 16,
        }
    }
}

/// The value side of a leaf entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntryValue {
    /// Records stored in the leaf, in duplicate order.
    List(Vec<StoredRecord>),
    /// Records moved out into a blob chain.
    Table { head: PageId, count: u32 },
}

impl EntryValue {
    pub(crate) fn record_count(&self) -> usize {
        match self {
            Self::List(records) => records.len(),
            Self::Table { count, .. } => *count as usize,
        }
    }

    pub(crate) fn encoded_size(&self) -> usize {
        match self {
            Self::List(records) => {
                1 + 4 + records.iter().map(StoredRecord::encoded_size).sum::<usize>()
            }
            Self::Table { .. } => 1 + 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeafEntry {
    pub key: Vec<u8>,
    pub value: EntryValue,
}

impl LeafEntry {
    pub(crate) fn encoded_size(&self) -> usize {
        2 + self.key.len() + self.value.encoded_size()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LeafNode {
    pub prev: Option<PageId>,
    pub next: Option<PageId>,
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    pub(crate) fn encoded_size(&self) -> usize {
        LEAF_HEADER
            + self
                .entries
                .iter()
                .map(LeafEntry::encoded_size)
                .sum::<usize>()
    }
}

/// `children.len() == keys.len() + 1`; keys in `children[i + 1]` are
/// greater than or equal to `keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InternalNode {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<PageId>,
}

pub(crate) fn separator_size(key: &[u8]) -> usize {
    2 + key.len() + 8
}

impl InternalNode {
    pub(crate) fn encoded_size(&self) -> usize {
        INTERNAL_HEADER
            + self
                .keys
                .iter()
                .map(|key| separator_size(key))
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    pub(crate) fn encoded_size(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.encoded_size(),
            Self::Internal(internal) => internal.encoded_size(),
        }
    }

    pub(crate) fn encode(&self, page_size: usize) -> CoreResult<Vec<u8>> {
        let size = self.encoded_size();
        if size > page_size {
            return Err(CoreError::internal(format!(
                "node of {size} bytes does not fit a {page_size}-byte page"
            )));
        }
        let mut buf = Vec::with_capacity(page_size);
        match self {
            Self::Leaf(leaf) => {
                buf.push(PageType::Leaf as u8);
                buf.push(0);
                buf.extend_from_slice(&(leaf.entries.len() as u16).to_le_bytes());
                buf.extend_from_slice(&[0; 4]);
                buf.extend_from_slice(&PageId::to_link(leaf.prev).to_le_bytes());
                buf.extend_from_slice(&PageId::to_link(leaf.next).to_le_bytes());
                for entry in &leaf.entries {
                    encode_entry(&mut buf, entry);
                }
            }
            Self::Internal(internal) => {
                buf.push(PageType::Internal as u8);
                buf.push(0);
                buf.extend_from_slice(&(internal.keys.len() as u16).to_le_bytes());
                buf.extend_from_slice(&[0; 4]);
                buf.extend_from_slice(&internal.children[0].as_u64().to_le_bytes());
                for (key, child) in internal.keys.iter().zip(&internal.children[1..]) {
                    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
                    buf.extend_from_slice(key);
                    buf.extend_from_slice(&child.as_u64().to_le_bytes());
                }
            }
        }
        buf.resize(page_size, 0);
        Ok(buf)
    }

    pub(crate) fn decode(page: PageId, bytes: &[u8]) -> CoreResult<Self> {
        let count = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));
        let mut reader = NodeReader {
            page,
            bytes,
            offset: NODE_HEADER,
        };
        match PageType::from_byte(bytes[0]) {
            Some(PageType::Leaf) => {
                let prev = PageId::from_link(reader.u64()?);
                let next = PageId::from_link(reader.u64()?);
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(reader.entry()?);
                }
                Ok(Self::Leaf(LeafNode {
                    prev,
                    next,
                    entries,
                }))
            }
            Some(PageType::Internal) => {
                let mut children = Vec::with_capacity(count + 1);
                let mut keys = Vec::with_capacity(count);
                children.push(reader.child()?);
                for _ in 0..count {
                    let len = usize::from(reader.u16()?);
                    keys.push(reader.take(len)?.to_vec());
                    children.push(reader.child()?);
                }
                Ok(Self::Internal(InternalNode { keys, children }))
            }
            _ => Err(CoreError::integrity(format!(
                "{page} is not a B-tree node (type {})",
                bytes[0]
            ))),
        }
    }
}

fn encode_entry(buf: &mut Vec<u8>, entry: &LeafEntry) {
    buf.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
    buf.extend_from_slice(&entry.key);
    match &entry.value {
        EntryValue::List(records) => {
            buf.push(0);
            buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
            for record in records {
                match record {
                    StoredRecord::Inline(bytes) => {
                        buf.push(0);
                        buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                        buf.extend_from_slice(bytes);
                    }
                    StoredRecord::Blob { head, len } => {
                        buf.push(1);
                        buf.extend_from_slice(&head.as_u64().to_le_bytes());
                        buf.extend_from_slice(&len.to_le_bytes());
                    }
                }
            }
        }
        EntryValue::Table { head, count } => {
            buf.push(1);
            buf.extend_from_slice(&head.as_u64().to_le_bytes());
            buf.extend_from_slice(&count.to_le_bytes());
        }
    }
}

struct NodeReader<'a> {
    page: PageId,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> NodeReader<'a> {
    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self.offset + len;
        if end > self.bytes.len() {
            return Err(CoreError::integrity(format!(
                "{} node data runs past the end of the page",
                self.page
            )));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        Ok(read_u32(self.take(4)?, 0))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        Ok(read_u64(self.take(8)?, 0))
    }

    fn child(&mut self) -> CoreResult<PageId> {
        PageId::from_link(self.u64()?)
            .ok_or_else(|| CoreError::integrity(format!("{} has a null child link", self.page)))
    }

    fn entry(&mut self) -> CoreResult<LeafEntry> {
        let key_len = usize::from(self.u16()?);
        let key = self.take(key_len)?.to_vec();
        let value = match self.u8()? {
            0 => {
                let count = self.u32()? as usize;
                let mut records = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    records.push(match self.u8()? {
                        0 => {
                            let len = self.u32()? as usize;
                            StoredRecord::Inline(self.take(len)?.to_vec())
                        }
                        1 => StoredRecord::Blob {
                            head: self.child()?,
                            len: self.u64()?,
                        },
                        tag => {
                            return Err(CoreError::integrity(format!(
                                "{} has unknown record tag {tag}",
                                self.page
                            )))
                        }
                    });
                }
                EntryValue::List(records)
            }
            1 => EntryValue::Table {
                head: self.child()?,
                count: self.u32()?,
            },
            tag => {
                return Err(CoreError::integrity(format!(
                    "{} has unknown value tag {tag}",
                    self.page
                )))
            }
        };
        Ok(LeafEntry { key, value })
    }
}
