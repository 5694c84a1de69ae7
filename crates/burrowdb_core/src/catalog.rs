//! Database catalog.
//!
//! The catalog maps database names to their configuration and B-tree root.
//! It is kept in memory, serialized into the header page on flush, and
//! cloned at the start of every write so a failed operation can restore it.
//!
//! ## Format
//!
//! ```text
//! | next_id (4) | count (2) | entry ... |
//!
//! entry:
//! | id (4) | name (2) | key_type (1) | key_size (2) | record_type (1) |
//! | record_size (4) | flags (1) | cmp_len (2) | cmp name | root (8) |
//! | last_recno (8) |
//! ```
//!
//! `0xFFFF` / `0xFFFF_FFFF` sizes mean "variable", a `0xFFFF` comparator
//! length means "no comparator name".

use crate::config::DbConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::{DbId, KeyType, PageId, RecordType};

const FLAG_DUPLICATES: u8 = 0x1;
const NO_KEY_SIZE: u16 = 0xFFFF;
const NO_RECORD_SIZE: u32 = 0xFFFF_FFFF;
const NO_NAME: u16 = 0xFFFF;

/// Persistent description of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DbMeta {
    pub id: DbId,
    pub name: u16,
    pub config: DbConfig,
    pub root: PageId,
    pub last_recno: u64,
}

/// All databases of an environment, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Catalog {
    next_id: u32,
    entries: Vec<DbMeta>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

impl Catalog {
    pub(crate) fn names(&self) -> Vec<u16> {
        self.entries.iter().map(|meta| meta.name).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &DbMeta> {
        self.entries.iter()
    }

    fn position(&self, name: u16) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&name, |meta| meta.name)
    }

    pub(crate) fn get(&self, name: u16) -> Option<&DbMeta> {
        self.position(name).ok().map(|index| &self.entries[index])
    }

    pub(crate) fn by_id(&self, id: DbId) -> Option<&DbMeta> {
        self.entries.iter().find(|meta| meta.id == id)
    }

    pub(crate) fn by_id_mut(&mut self, id: DbId) -> Option<&mut DbMeta> {
        self.entries.iter_mut().find(|meta| meta.id == id)
    }

    /// Looks up a database by id, failing if it vanished.
    pub(crate) fn require(&self, id: DbId) -> CoreResult<&DbMeta> {
        self.by_id(id)
            .ok_or_else(|| CoreError::not_ready(format!("database {id} no longer exists")))
    }

    pub(crate) fn require_mut(&mut self, id: DbId) -> CoreResult<&mut DbMeta> {
        self.by_id_mut(id)
            .ok_or_else(|| CoreError::not_ready(format!("database {id} no longer exists")))
    }

    /// Adds a database and returns its new id.
    pub(crate) fn insert(&mut self, name: u16, config: DbConfig, root: PageId) -> CoreResult<DbId> {
        let index = match self.position(name) {
            Ok(_) => return Err(CoreError::DatabaseAlreadyExists { name }),
            Err(index) => index,
        };
        let id = DbId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| CoreError::limits_reached("database ids exhausted"))?;
        self.entries.insert(
            index,
            DbMeta {
                id,
                name,
                config,
                root,
                last_recno: 0,
            },
        );
        Ok(id)
    }

    pub(crate) fn remove(&mut self, name: u16) -> CoreResult<DbMeta> {
        match self.position(name) {
            Ok(index) => Ok(self.entries.remove(index)),
            Err(_) => Err(CoreError::DatabaseNotFound { name }),
        }
    }

    pub(crate) fn rename(&mut self, old: u16, new: u16) -> CoreResult<()> {
        if old == new {
            return if self.get(old).is_some() {
                Ok(())
            } else {
                Err(CoreError::DatabaseNotFound { name: old })
            };
        }
        if self.get(new).is_some() {
            return Err(CoreError::DatabaseAlreadyExists { name: new });
        }
        let mut meta = self.remove(old)?;
        meta.name = new;
        let index = self.position(new).unwrap_or_else(|index| index);
        self.entries.insert(index, meta);
        Ok(())
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + self.entries.len() * 40);
        buf.extend_from_slice(&self.next_id.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for meta in &self.entries {
            let config = &meta.config;
            buf.extend_from_slice(&meta.id.as_u32().to_le_bytes());
            buf.extend_from_slice(&meta.name.to_le_bytes());
            buf.push(config.key_type.tag());
            buf.extend_from_slice(&config.key_size.unwrap_or(NO_KEY_SIZE).to_le_bytes());
            buf.push(config.record_type.tag());
            buf.extend_from_slice(&config.record_size.unwrap_or(NO_RECORD_SIZE).to_le_bytes());
            buf.push(if config.enable_duplicate_keys {
                FLAG_DUPLICATES
            } else {
                0
            });
            match &config.custom_compare_name {
                Some(name) => {
                    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
                    buf.extend_from_slice(name.as_bytes());
                }
                None => buf.extend_from_slice(&NO_NAME.to_le_bytes()),
            }
            buf.extend_from_slice(&meta.root.as_u64().to_le_bytes());
            buf.extend_from_slice(&meta.last_recno.to_le_bytes());
        }
        buf
    }

    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let mut reader = Reader { bytes, offset: 0 };
        let next_id = reader.u32()?;
        let count = reader.u16()?;

        let mut entries = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let id = DbId(reader.u32()?);
            let name = reader.u16()?;
            let key_type = KeyType::from_tag(reader.u8()?)?;
            let key_size = Some(reader.u16()?).filter(|&size| size != NO_KEY_SIZE);
            let record_type = RecordType::from_tag(reader.u8()?)?;
            let record_size = Some(reader.u32()?).filter(|&size| size != NO_RECORD_SIZE);
            let flags = reader.u8()?;
            let name_len = reader.u16()?;
            let custom_compare_name = if name_len == NO_NAME {
                None
            } else {
                let raw = reader.take(usize::from(name_len))?;
                Some(
                    String::from_utf8(raw.to_vec())
                        .map_err(|_| CoreError::integrity("comparator name is not UTF-8"))?,
                )
            };
            let root = PageId(reader.u64()?);
            let last_recno = reader.u64()?;

            entries.push(DbMeta {
                id,
                name,
                config: DbConfig {
                    key_type,
                    key_size,
                    record_type,
                    record_size,
                    enable_duplicate_keys: flags & FLAG_DUPLICATES != 0,
                    custom_compare_name,
                },
                root,
                last_recno,
            });
        }

        if entries.windows(2).any(|pair| pair[0].name >= pair[1].name) {
            return Err(CoreError::integrity("catalog entries are not sorted"));
        }
        Ok(Self { next_id, entries })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self.offset + len;
        if end > self.bytes.len() {
            return Err(CoreError::integrity("catalog is truncated"));
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
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog
            .insert(7, DbConfig::new().enable_duplicate_keys(true), PageId(3))
            .unwrap();
        catalog
            .insert(
                2,
                DbConfig::new()
                    .key_type(KeyType::Custom)
                    .custom_compare_name("reverse"),
                PageId(4),
            )
            .unwrap();
        catalog
            .insert(
                5,
                DbConfig {
                    key_type: KeyType::UInt32,
                    key_size: Some(4),
                    record_type: RecordType::Real64,
                    record_size: Some(8),
                    ..DbConfig::default()
                },
                PageId(9),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn names_are_sorted() {
        assert_eq!(catalog().names(), vec![2, 5, 7]);
    }

    #[test]
    fn encode_decode() {
        let mut original = catalog();
        original.require_mut(DbId(1)).unwrap().last_recno = 42;
        let decoded = Catalog::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(Catalog::decode(&[]).unwrap(), Catalog::default());
    }

    #[test]
    fn truncated_catalog_is_integrity_error() {
        let bytes = catalog().encode();
        let err = Catalog::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntegrityViolated);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut catalog = catalog();
        let err = catalog.insert(5, DbConfig::new(), PageId(1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DatabaseAlreadyExists);
    }

    #[test]
    fn ids_are_not_reused() {
        let mut catalog = catalog();
        catalog.remove(7).unwrap();
        let id = catalog.insert(7, DbConfig::new(), PageId(1)).unwrap();
        assert_eq!(id, DbId(4));
    }

    #[test]
    fn rename_keeps_id_and_order() {
        let mut catalog = catalog();
        let id = catalog.get(2).unwrap().id;
        catalog.rename(2, 9).unwrap();
        assert_eq!(catalog.names(), vec![5, 7, 9]);
        assert_eq!(catalog.get(9).unwrap().id, id);

        assert_eq!(
            catalog.rename(5, 7).unwrap_err().code(),
            ErrorCode::DatabaseAlreadyExists
        );
        assert_eq!(
            catalog.rename(1, 3).unwrap_err().code(),
            ErrorCode::DatabaseNotFound
        );
        assert!(catalog.rename(5, 5).is_ok());
    }

    #[test]
    fn remove_missing() {
        let mut catalog = catalog();
        assert_eq!(
            catalog.remove(100).unwrap_err().code(),
            ErrorCode::DatabaseNotFound
        );
    }
}
