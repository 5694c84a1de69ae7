//! Fixed-size page slots over a storage backend.
//!
//! ```text
//! +----------------------+--------+--------+--------+-----
//! | superblock (512 B)   | slot 0 | slot 1 | slot 2 | ...
//! +----------------------+--------+--------+--------+-----
//! ```
//!
//! The superblock is never transformed, so `open` can validate the format
//! and learn how the slots are encoded before reading any page. Each slot
//! holds one page after its [`PageTransform`] ran.

use crate::crypto::{self, PageCipher};
use crate::error::{CoreError, CoreResult};
use crate::page::transform::{compute_crc32, Crc32Trailer, Identity, PageTransform};
use crate::types::PageId;
use burrowdb_storage::{StorageBackend, StorageError};
use std::sync::Arc;

/// Size of the plaintext superblock.
pub(crate) const SUPERBLOCK_SIZE: u64 = 512;
/// Major format version; files with another major version are rejected.
pub(crate) const FORMAT_MAJOR: u16 = 1;
/// Minor format version.
pub(crate) const FORMAT_MINOR: u16 = 0;

const MAGIC: [u8; 4] = *b"BRWD";
const SALT_LEN: usize = 16;

const SB_CRC32: u32 = 0x1;
const SB_ENCRYPTED: u32 = 0x2;
const SB_CUSTOM: u32 = 0x4;

/// File header describing how the rest of the file is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Superblock {
    pub major: u16,
    pub minor: u16,
    pub page_size: u32,
    pub flags: u32,
    pub salt: [u8; SALT_LEN],
}

impl Superblock {
    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SUPERBLOCK_SIZE as usize];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.major.to_le_bytes());
        buf[6..8].copy_from_slice(&self.minor.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..32].copy_from_slice(&self.salt);
        let crc = compute_crc32(&buf[0..32]);
        buf[32..36].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < 36 {
            return Err(CoreError::invalid_file_header("superblock is truncated"));
        }
        if buf[0..4] != MAGIC {
            return Err(CoreError::invalid_file_header("bad magic number"));
        }
        let stored = u32::from_le_bytes([buf[32], buf[33], buf[34], buf[35]]);
        if stored != compute_crc32(&buf[0..32]) {
            return Err(CoreError::invalid_file_header("superblock checksum mismatch"));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&buf[16..32]);
        Ok(Self {
            major: u16::from_le_bytes([buf[4], buf[5]]),
            minor: u16::from_le_bytes([buf[6], buf[7]]),
            page_size: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            flags: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            salt,
        })
    }
}

/// Options used to create or open a page store.
#[derive(Clone, Default)]
pub(crate) struct StoreOptions {
    pub page_size: u32,
    pub enable_crc32: bool,
    pub encryption_key: Option<Vec<u8>>,
    pub custom_transform: Option<Arc<dyn PageTransform>>,
    pub file_size_limit: Option<u64>,
    pub read_only: bool,
}

/// Page slots over a backend.
pub(crate) struct PageStore {
    backend: Box<dyn StorageBackend>,
    superblock: Superblock,
    page_size: usize,
    slot_size: usize,
    transform: Arc<dyn PageTransform>,
    file_size_limit: Option<u64>,
    read_only: bool,
}

impl PageStore {
    /// Initializes a new store, discarding anything in the backend.
    pub(crate) fn create(
        mut backend: Box<dyn StorageBackend>,
        options: &StoreOptions,
    ) -> CoreResult<Self> {
        let mut flags = 0;
        let mut salt = [0u8; SALT_LEN];
        if options.encryption_key.is_some() {
            flags |= SB_ENCRYPTED;
            salt = crypto::generate_salt();
        } else if options.custom_transform.is_some() {
            flags |= SB_CUSTOM;
        } else if options.enable_crc32 {
            flags |= SB_CRC32;
        }

        let superblock = Superblock {
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            page_size: options.page_size,
            flags,
            salt,
        };
        let transform = build_transform(&superblock, options)?;

        backend.set_len(0)?;
        backend.write_at(0, &superblock.encode())?;

        Ok(Self::assemble(backend, superblock, transform, options))
    }

    /// Opens an existing store and validates its superblock.
    pub(crate) fn open(
        backend: Box<dyn StorageBackend>,
        options: &StoreOptions,
    ) -> CoreResult<Self> {
        if backend.size()? < SUPERBLOCK_SIZE {
            return Err(CoreError::invalid_file_header("file is too small"));
        }
        let raw = backend.read_at(0, SUPERBLOCK_SIZE as usize)?;
        let superblock = Superblock::decode(&raw)?;

        if superblock.major != FORMAT_MAJOR {
            return Err(CoreError::InvalidFileVersion {
                found_major: superblock.major,
                found_minor: superblock.minor,
                expected_major: FORMAT_MAJOR,
            });
        }
        crate::config::validate_page_size(superblock.page_size)
            .map_err(|_| CoreError::invalid_file_header("unsupported page size"))?;

        let encrypted = superblock.flags & SB_ENCRYPTED != 0;
        if encrypted && options.encryption_key.is_none() {
            return Err(CoreError::invalid_parameter(
                "file is encrypted but no encryption key was given",
            ));
        }
        if !encrypted && options.encryption_key.is_some() {
            return Err(CoreError::invalid_parameter(
                "an encryption key was given but the file is not encrypted",
            ));
        }
        let custom = superblock.flags & SB_CUSTOM != 0;
        if custom != options.custom_transform.is_some() {
            return Err(CoreError::invalid_parameter(
                "the custom page transform does not match the file",
            ));
        }

        let transform = build_transform(&superblock, options)?;
        Ok(Self::assemble(backend, superblock, transform, options))
    }

    fn assemble(
        backend: Box<dyn StorageBackend>,
        superblock: Superblock,
        transform: Arc<dyn PageTransform>,
        options: &StoreOptions,
    ) -> Self {
        let page_size = superblock.page_size as usize;
        Self {
            backend,
            slot_size: page_size + transform.overhead(),
            page_size,
            superblock,
            transform,
            file_size_limit: options.file_size_limit,
            read_only: options.read_only,
        }
    }

    /// Page size in bytes.
    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns true if pages are encrypted.
    pub(crate) fn is_encrypted(&self) -> bool {
        self.superblock.flags & SB_ENCRYPTED != 0
    }

    /// Returns true if pages carry a CRC32 trailer.
    pub(crate) fn has_crc32(&self) -> bool {
        self.superblock.flags & SB_CRC32 != 0
    }

    /// Format version of the file.
    pub(crate) fn version(&self) -> (u16, u16) {
        (self.superblock.major, self.superblock.minor)
    }

    fn slot_offset(&self, page: PageId) -> u64 {
        SUPERBLOCK_SIZE + page.as_u64() * self.slot_size as u64
    }

    /// Reads and decodes one page.
    pub(crate) fn read_page(&self, page: PageId) -> CoreResult<Vec<u8>> {
        let raw = self
            .backend
            .read_at(self.slot_offset(page), self.slot_size)
            .map_err(|err| match err {
                StorageError::ReadPastEnd { .. } => {
                    CoreError::integrity(format!("{page} lies beyond the end of the file"))
                }
                other => CoreError::Storage(other),
            })?;

        let plain = self.transform.decode(page, &raw)?;
        if plain.len() < self.page_size {
            return Err(CoreError::integrity(format!(
                "{page} decoded to {} bytes, expected {}",
                plain.len(),
                self.page_size
            )));
        }
        Ok(plain)
    }

    /// Encodes and writes one page.
    pub(crate) fn write_page(&mut self, page: PageId, plain: &[u8]) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::WriteProtected);
        }
        debug_assert_eq!(plain.len(), self.page_size);

        let mut encoded = self.transform.encode(page, plain)?;
        if encoded.len() > self.slot_size {
            return Err(CoreError::internal(format!(
                "{page} encoded to {} bytes, slot holds {}",
                encoded.len(),
                self.slot_size
            )));
        }
        encoded.resize(self.slot_size, 0);

        let offset = self.slot_offset(page);
        self.check_limit(offset + self.slot_size as u64)?;
        self.backend.write_at(offset, &encoded)?;
        Ok(())
    }

    /// Fails with `LimitsReached` if `page_count` pages would exceed the
    /// configured file size limit.
    pub(crate) fn check_capacity(&self, page_count: u64) -> CoreResult<()> {
        self.check_limit(SUPERBLOCK_SIZE + page_count * self.slot_size as u64)
    }

    fn check_limit(&self, end: u64) -> CoreResult<()> {
        match self.file_size_limit {
            Some(limit) if end > limit => Err(CoreError::limits_reached(format!(
                "file would grow to {end} bytes, limit is {limit}"
            ))),
            _ => Ok(()),
        }
    }

    /// Switches to page encryption and rewrites every page.
    ///
    /// `pages` must hold the plaintext of every page, in page order.
    pub(crate) fn encrypt_all(&mut self, key: &[u8], pages: &[Vec<u8>]) -> CoreResult<()> {
        if self.read_only {
            return Err(CoreError::WriteProtected);
        }
        let salt = crypto::generate_salt();
        let cipher: Arc<dyn PageTransform> = Arc::new(PageCipher::new(key, &salt)?);

        self.superblock.flags = (self.superblock.flags & !(SB_CRC32 | SB_CUSTOM)) | SB_ENCRYPTED;
        self.superblock.salt = salt;
        self.slot_size = self.page_size + cipher.overhead();
        self.transform = cipher;

        self.backend.set_len(0)?;
        self.backend.write_at(0, &self.superblock.encode())?;
        for (index, plain) in pages.iter().enumerate() {
            self.write_page(PageId(index as u64), plain)?;
        }
        Ok(())
    }

    /// Pushes buffered writes to the OS, and to disk if `sync` is set.
    pub(crate) fn flush(&mut self, sync: bool) -> CoreResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }
        Ok(())
    }
}

fn build_transform(
    superblock: &Superblock,
    options: &StoreOptions,
) -> CoreResult<Arc<dyn PageTransform>> {
    if superblock.flags & SB_ENCRYPTED != 0 {
        let key = options
            .encryption_key
            .as_deref()
            .ok_or_else(|| CoreError::invalid_parameter("missing encryption key"))?;
        return Ok(Arc::new(PageCipher::new(key, &superblock.salt)?));
    }
    if superblock.flags & SB_CUSTOM != 0 {
        return options
            .custom_transform
            .clone()
            .ok_or_else(|| CoreError::invalid_parameter("missing custom page transform"));
    }
    if superblock.flags & SB_CRC32 != 0 {
        return Ok(Arc::new(Crc32Trailer));
    }
    Ok(Arc::new(Identity))
}
