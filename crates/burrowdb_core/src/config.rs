//! Environment and database configuration.
//!
//! Configuration is a pair of plain structs with named fields and builder
//! methods. Bindings that speak the flag-word plus `(code, value)` list
//! protocol go through [`EnvConfig::from_raw`] and [`DbConfig::from_raw`],
//! which validate everything before any state is touched.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::page::PageTransform;
use crate::types::{KeyType, RecordType};
use std::fmt;
use std::sync::Arc;

/// Flag bits accepted by [`EnvConfig::from_raw`] and [`DbConfig::from_raw`].
pub mod flags {
    /// Sync the backing file on every flush.
    pub const ENABLE_FSYNC: u32 = 0x0000_0001;
    /// Open the environment read-only.
    pub const READ_ONLY: u32 = 0x0000_0004;
    /// Keep everything in memory; nothing is persisted.
    pub const IN_MEMORY: u32 = 0x0000_0080;
    /// Database keys are auto-assigned 32-bit record numbers.
    pub const RECORD_NUMBER32: u32 = 0x0000_1000;
    /// Database keys are auto-assigned 64-bit record numbers.
    pub const RECORD_NUMBER64: u32 = 0x0000_2000;
    /// Database allows several records per key.
    pub const ENABLE_DUPLICATE_KEYS: u32 = 0x0000_4000;
    /// Environment supports transactions.
    pub const ENABLE_TRANSACTIONS: u32 = 0x0002_0000;
    /// Cache may grow past its byte budget.
    pub const CACHE_UNLIMITED: u32 = 0x0004_0000;
    /// Pages carry a CRC32 trailer that is verified on read.
    pub const ENABLE_CRC32: u32 = 0x0200_0000;

    pub(crate) const ENV_MASK: u32 = ENABLE_FSYNC
        | READ_ONLY
        | IN_MEMORY
        | ENABLE_TRANSACTIONS
        | CACHE_UNLIMITED
        | ENABLE_CRC32;
    pub(crate) const DB_MASK: u32 = RECORD_NUMBER32 | RECORD_NUMBER64 | ENABLE_DUPLICATE_KEYS;
}

/// Parameter codes accepted in `(code, value)` lists.
pub mod param {
    /// Cache budget in bytes (environment).
    pub const CACHE_SIZE: u32 = 0x100;
    /// Page size in bytes (environment).
    pub const PAGE_SIZE: u32 = 0x101;
    /// Fixed key size in bytes (database).
    pub const KEY_SIZE: u32 = 0x102;
    /// Key type code (database).
    pub const KEY_TYPE: u32 = 0x104;
    /// Fixed record size in bytes (database).
    pub const RECORD_SIZE: u32 = 0x108;
    /// Maximum file size in bytes (environment).
    pub const FILE_SIZE_LIMIT: u32 = 0x109;
    /// Record type code (database).
    pub const RECORD_TYPE: u32 = 0x112;
}

/// `KEY_SIZE` value meaning "variable length".
pub const KEY_SIZE_UNLIMITED: u64 = 0xFFFF;
/// `RECORD_SIZE` value meaning "variable length".
pub const RECORD_SIZE_UNLIMITED: u64 = 0xFFFF_FFFF;

/// Default page size (16 KiB).
pub const DEFAULT_PAGE_SIZE: u32 = 16 * 1024;
/// Default cache budget (2 MiB).
pub const DEFAULT_CACHE_SIZE: u64 = 2 * 1024 * 1024;
/// Largest supported page size (64 KiB).
pub const MAX_PAGE_SIZE: u32 = 64 * 1024;

/// Checks the page size rule: 1024, or a multiple of 2048 up to 64 KiB.
///
/// # Errors
///
/// Returns `InvPageSize` for any other value.
pub fn validate_page_size(size: u32) -> CoreResult<()> {
    if size == 1024 || (size % 2048 == 0 && size > 0 && size <= MAX_PAGE_SIZE) {
        Ok(())
    } else {
        Err(CoreError::InvalidPageSize { size })
    }
}

/// Largest key accepted for a page size.
#[must_use]
pub const fn max_key_size(page_size: u32) -> usize {
    (page_size / 8) as usize - 16
}

/// Iterates a `(0,0)`-terminated parameter list.
fn raw_params(params: &[(u32, u64)]) -> impl Iterator<Item = (u32, u64)> + '_ {
    params.iter().copied().take_while(|&(code, _)| code != 0)
}

/// Configuration for creating or opening an environment.
#[derive(Clone)]
pub struct EnvConfig {
    /// Page size in bytes. Ignored on open; the file's page size wins.
    pub page_size: u32,
    /// Cache budget in bytes.
    pub cache_size: u64,
    /// Let the cache grow past `cache_size` instead of failing.
    pub cache_unlimited: bool,
    /// Maximum file size in bytes.
    pub file_size_limit: Option<u64>,
    /// Keep everything in memory.
    pub in_memory: bool,
    /// Open read-only; writes fail with `WriteProtected`.
    pub read_only: bool,
    /// Allow transactions.
    pub enable_transactions: bool,
    /// Sync the file on flush.
    pub enable_fsync: bool,
    /// Protect every page with a CRC32 trailer.
    pub enable_crc32: bool,
    /// Unix permission bits for a newly created file.
    pub file_mode: u32,
    /// Raw key material for page encryption.
    pub encryption_key: Option<Vec<u8>>,
    /// Custom page transform (for example a compressor).
    pub page_transform: Option<Arc<dyn PageTransform>>,
    /// Shared engine context.
    pub context: Arc<Context>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            cache_unlimited: false,
            file_size_limit: None,
            in_memory: false,
            read_only: false,
            enable_transactions: false,
            enable_fsync: false,
            enable_crc32: false,
            file_mode: 0o644,
            encryption_key: None,
            page_transform: None,
            context: Arc::new(Context::new()),
        }
    }
}

impl EnvConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a flag word and a `(0,0)`-terminated parameter list.
    ///
    /// # Errors
    ///
    /// Unknown flags, unknown or database-only parameter codes and
    /// out-of-range values fail with `InvParameter` (or `InvPageSize`).
    pub fn from_raw(flag_word: u32, params: &[(u32, u64)]) -> CoreResult<Self> {
        if flag_word & !flags::ENV_MASK != 0 {
            return Err(CoreError::invalid_parameter(format!(
                "unknown environment flags {:#x}",
                flag_word & !flags::ENV_MASK
            )));
        }

        let mut config = Self {
            enable_fsync: flag_word & flags::ENABLE_FSYNC != 0,
            read_only: flag_word & flags::READ_ONLY != 0,
            in_memory: flag_word & flags::IN_MEMORY != 0,
            enable_transactions: flag_word & flags::ENABLE_TRANSACTIONS != 0,
            cache_unlimited: flag_word & flags::CACHE_UNLIMITED != 0,
            enable_crc32: flag_word & flags::ENABLE_CRC32 != 0,
            ..Self::default()
        };

        for (code, value) in raw_params(params) {
            match code {
                param::CACHE_SIZE => config.cache_size = value,
                param::PAGE_SIZE => {
                    let size = u32::try_from(value)
                        .map_err(|_| CoreError::InvalidPageSize { size: u32::MAX })?;
                    config.page_size = size;
                }
                param::FILE_SIZE_LIMIT => config.file_size_limit = Some(value),
                other => {
                    return Err(CoreError::invalid_parameter(format!(
                        "parameter {other:#x} is not an environment parameter"
                    )))
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvPageSize` for a bad page size and `InvParameter` for
    /// contradicting options.
    pub fn validate(&self) -> CoreResult<()> {
        validate_page_size(self.page_size)?;
        if self.cache_size == 0 && !self.cache_unlimited {
            return Err(CoreError::invalid_parameter("cache size must be non-zero"));
        }
        if self.in_memory && self.read_only {
            return Err(CoreError::invalid_parameter(
                "an in-memory environment cannot be read-only",
            ));
        }
        if self.in_memory && self.encryption_key.is_some() {
            return Err(CoreError::invalid_parameter(
                "an in-memory environment cannot be encrypted",
            ));
        }
        if self.encryption_key.as_ref().is_some_and(Vec::is_empty) {
            return Err(CoreError::invalid_parameter("encryption key is empty"));
        }
        if self.encryption_key.is_some() && self.page_transform.is_some() {
            return Err(CoreError::invalid_parameter(
                "encryption and a custom page transform cannot be combined",
            ));
        }
        Ok(())
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the cache budget in bytes.
    #[must_use]
    pub const fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Lets the cache grow past its budget.
    #[must_use]
    pub const fn cache_unlimited(mut self, value: bool) -> Self {
        self.cache_unlimited = value;
        self
    }

    /// Sets the maximum file size.
    #[must_use]
    pub const fn file_size_limit(mut self, limit: u64) -> Self {
        self.file_size_limit = Some(limit);
        self
    }

    /// Keeps the environment in memory.
    #[must_use]
    pub const fn in_memory(mut self, value: bool) -> Self {
        self.in_memory = value;
        self
    }

    /// Opens the environment read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Enables transactions.
    #[must_use]
    pub const fn enable_transactions(mut self, value: bool) -> Self {
        self.enable_transactions = value;
        self
    }

    /// Syncs the file on flush.
    #[must_use]
    pub const fn enable_fsync(mut self, value: bool) -> Self {
        self.enable_fsync = value;
        self
    }

    /// Protects pages with a CRC32 trailer.
    #[must_use]
    pub const fn enable_crc32(mut self, value: bool) -> Self {
        self.enable_crc32 = value;
        self
    }

    /// Sets the permission bits of a newly created file.
    #[must_use]
    pub const fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Encrypts pages with a key derived from `key`.
    #[must_use]
    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    /// Installs a custom page transform.
    #[must_use]
    pub fn page_transform(mut self, transform: Arc<dyn PageTransform>) -> Self {
        self.page_transform = Some(transform);
        self
    }

    /// Uses a shared engine context.
    #[must_use]
    pub fn context(mut self, context: Arc<Context>) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfig")
            .field("page_size", &self.page_size)
            .field("cache_size", &self.cache_size)
            .field("cache_unlimited", &self.cache_unlimited)
            .field("file_size_limit", &self.file_size_limit)
            .field("in_memory", &self.in_memory)
            .field("read_only", &self.read_only)
            .field("enable_transactions", &self.enable_transactions)
            .field("enable_fsync", &self.enable_fsync)
            .field("enable_crc32", &self.enable_crc32)
            .field("file_mode", &format_args!("{:o}", self.file_mode))
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("page_transform", &self.page_transform.is_some())
            .finish()
    }
}

/// Configuration of a database, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbConfig {
    /// Key type.
    pub key_type: KeyType,
    /// Fixed key size; `None` for variable-length keys.
    pub key_size: Option<u16>,
    /// Record type.
    pub record_type: RecordType,
    /// Fixed record size; `None` for variable-length records.
    pub record_size: Option<u32>,
    /// Allow several records per key.
    pub enable_duplicate_keys: bool,
    /// Name of a comparator registered in the [`Context`].
    pub custom_compare_name: Option<String>,
}

impl DbConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a flag word and a `(0,0)`-terminated parameter list.
    ///
    /// # Errors
    ///
    /// Unknown flags, unknown or environment-only parameter codes and
    /// malformed values fail with `InvParameter` (or `InvKeySize`).
    pub fn from_raw(flag_word: u32, params: &[(u32, u64)]) -> CoreResult<Self> {
        if flag_word & !flags::DB_MASK != 0 {
            return Err(CoreError::invalid_parameter(format!(
                "unknown database flags {:#x}",
                flag_word & !flags::DB_MASK
            )));
        }

        let recno32 = flag_word & flags::RECORD_NUMBER32 != 0;
        let recno64 = flag_word & flags::RECORD_NUMBER64 != 0;
        if recno32 && recno64 {
            return Err(CoreError::invalid_parameter(
                "RECORD_NUMBER32 and RECORD_NUMBER64 are exclusive",
            ));
        }

        let mut config = Self {
            enable_duplicate_keys: flag_word & flags::ENABLE_DUPLICATE_KEYS != 0,
            ..Self::default()
        };
        if recno32 {
            config.key_type = KeyType::RecordNumber32;
        } else if recno64 {
            config.key_type = KeyType::RecordNumber64;
        }

        for (code, value) in raw_params(params) {
            match code {
                param::KEY_TYPE => {
                    if recno32 || recno64 {
                        return Err(CoreError::invalid_parameter(
                            "KEY_TYPE cannot be combined with record-number flags",
                        ));
                    }
                    config.key_type = KeyType::from_param(value)?;
                }
                param::KEY_SIZE => {
                    config.key_size = if value == KEY_SIZE_UNLIMITED {
                        None
                    } else {
                        Some(u16::try_from(value).map_err(|_| {
                            CoreError::invalid_key_size(format!("key size {value} is too large"))
                        })?)
                    };
                }
                param::RECORD_TYPE => config.record_type = RecordType::from_param(value)?,
                param::RECORD_SIZE => {
                    config.record_size = if value == RECORD_SIZE_UNLIMITED {
                        None
                    } else {
                        Some(u32::try_from(value).map_err(|_| {
                            CoreError::invalid_parameter(format!(
                                "record size {value} is too large"
                            ))
                        })?)
                    };
                }
                other => {
                    return Err(CoreError::invalid_parameter(format!(
                        "parameter {other:#x} is not a database parameter"
                    )))
                }
            }
        }

        Ok(config)
    }

    /// Normalizes the configuration for a page size.
    ///
    /// Numeric key and record types imply their sizes; explicit sizes must
    /// agree with them.
    ///
    /// # Errors
    ///
    /// Returns `InvKeySize` for key size conflicts or keys that cannot fit a
    /// node, and `InvParameter` for record size conflicts and misplaced
    /// comparator names.
    pub fn resolve(mut self, page_size: u32) -> CoreResult<Self> {
        if let Some(implied) = self.key_type.fixed_size() {
            match self.key_size {
                Some(size) if size != implied => {
                    return Err(CoreError::invalid_key_size(format!(
                        "key type {} requires key size {implied}, got {size}",
                        self.key_type
                    )))
                }
                _ => self.key_size = Some(implied),
            }
        }
        if let Some(size) = self.key_size {
            if size == 0 || usize::from(size) > max_key_size(page_size) {
                return Err(CoreError::invalid_key_size(format!(
                    "key size {size} is outside 1..={}",
                    max_key_size(page_size)
                )));
            }
        }

        if let Some(implied) = self.record_type.fixed_size() {
            match self.record_size {
                Some(size) if size != implied => {
                    return Err(CoreError::invalid_parameter(format!(
                        "record type {} requires record size {implied}, got {size}",
                        self.record_type
                    )))
                }
                _ => self.record_size = Some(implied),
            }
        }

        if self.custom_compare_name.is_some() && self.key_type != KeyType::Custom {
            return Err(CoreError::invalid_parameter(
                "custom_compare_name requires the custom key type",
            ));
        }
        Ok(self)
    }

    /// Sets the key type.
    #[must_use]
    pub const fn key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    /// Sets a fixed key size.
    #[must_use]
    pub const fn key_size(mut self, size: u16) -> Self {
        self.key_size = Some(size);
        self
    }

    /// Sets the record type.
    #[must_use]
    pub const fn record_type(mut self, record_type: RecordType) -> Self {
        self.record_type = record_type;
        self
    }

    /// Sets a fixed record size.
    #[must_use]
    pub const fn record_size(mut self, size: u32) -> Self {
        self.record_size = Some(size);
        self
    }

    /// Allows several records per key.
    #[must_use]
    pub const fn enable_duplicate_keys(mut self, value: bool) -> Self {
        self.enable_duplicate_keys = value;
        self
    }

    /// Resolves the comparator by name from the context.
    #[must_use]
    pub fn custom_compare_name(mut self, name: impl Into<String>) -> Self {
        self.custom_compare_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn default_env_config() {
        let config = EnvConfig::default();
        assert_eq!(config.page_size, 16 * 1024);
        assert_eq!(config.cache_size, 2 * 1024 * 1024);
        assert!(!config.enable_transactions);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = EnvConfig::new()
            .page_size(4096)
            .enable_transactions(true)
            .cache_size(1024 * 1024);

        assert_eq!(config.page_size, 4096);
        assert!(config.enable_transactions);
        assert_eq!(config.cache_size, 1024 * 1024);
    }

    #[test]
    fn page_size_rule() {
        assert!(validate_page_size(1024).is_ok());
        assert!(validate_page_size(2048).is_ok());
        assert!(validate_page_size(64 * 1024).is_ok());
        assert!(validate_page_size(3000).is_err());
        assert!(validate_page_size(3072).is_err());
        assert!(validate_page_size(128 * 1024).is_err());
        assert!(validate_page_size(0).is_err());
    }

    #[test]
    fn env_from_raw() {
        let config = EnvConfig::from_raw(
            flags::ENABLE_TRANSACTIONS | flags::IN_MEMORY,
            &[(param::PAGE_SIZE, 4096), (param::CACHE_SIZE, 65536), (0, 0)],
        )
        .unwrap();

        assert!(config.enable_transactions);
        assert!(config.in_memory);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.cache_size, 65536);
    }

    #[test]
    fn env_from_raw_stops_at_terminator() {
        let config =
            EnvConfig::from_raw(0, &[(param::CACHE_SIZE, 4096), (0, 0), (0xdead, 1)]).unwrap();
        assert_eq!(config.cache_size, 4096);
    }

    #[test]
    fn env_from_raw_rejects_bad_input() {
        let err = EnvConfig::from_raw(0x8000_0000, &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);

        let err = EnvConfig::from_raw(0, &[(param::KEY_TYPE, 1)]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);

        let err = EnvConfig::from_raw(0, &[(param::PAGE_SIZE, 1000)]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvPageSize);

        let err = EnvConfig::from_raw(flags::IN_MEMORY | flags::READ_ONLY, &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);
    }

    #[test]
    fn db_from_raw() {
        let config = DbConfig::from_raw(
            flags::ENABLE_DUPLICATE_KEYS,
            &[(param::KEY_TYPE, 7), (param::RECORD_SIZE, 4), (0, 0)],
        )
        .unwrap();

        assert!(config.enable_duplicate_keys);
        assert_eq!(config.key_type, KeyType::UInt32);
        assert_eq!(config.record_size, Some(4));

        let recno = DbConfig::from_raw(flags::RECORD_NUMBER64, &[]).unwrap();
        assert_eq!(recno.key_type, KeyType::RecordNumber64);
    }

    #[test]
    fn db_from_raw_rejects_bad_input() {
        let err = DbConfig::from_raw(flags::ENABLE_TRANSACTIONS, &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);

        let err = DbConfig::from_raw(0, &[(param::CACHE_SIZE, 10)]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);

        let err = DbConfig::from_raw(0, &[(param::KEY_TYPE, 99)]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);

        let err =
            DbConfig::from_raw(flags::RECORD_NUMBER32 | flags::RECORD_NUMBER64, &[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);
    }

    #[test]
    fn resolve_implies_sizes() {
        let config = DbConfig::new()
            .key_type(KeyType::UInt64)
            .record_type(RecordType::UInt32)
            .resolve(DEFAULT_PAGE_SIZE)
            .unwrap();
        assert_eq!(config.key_size, Some(8));
        assert_eq!(config.record_size, Some(4));
    }

    #[test]
    fn resolve_rejects_conflicts() {
        let err = DbConfig::new()
            .key_type(KeyType::UInt32)
            .key_size(8)
            .resolve(DEFAULT_PAGE_SIZE)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvKeySize);

        let err = DbConfig::new()
            .key_size(4000)
            .resolve(DEFAULT_PAGE_SIZE)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvKeySize);

        let err = DbConfig::new()
            .custom_compare_name("cmp")
            .resolve(DEFAULT_PAGE_SIZE)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvParameter);
    }

    #[test]
    fn debug_redacts_key() {
        let config = EnvConfig::new().encryption_key(b"secret".to_vec());
        let text = format!("{config:?}");
        assert!(text.contains("REDACTED"));
        assert!(!text.contains("secret"));
    }
}
