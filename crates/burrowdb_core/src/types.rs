//! Core type definitions for burrowdb.

use crate::error::{CoreError, CoreResult};
use std::fmt;

/// Address of a fixed-size page in the page store.
///
/// Page 0 is the environment header; node and blob pages start at 1, so a
/// stored zero doubles as "no page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u64);

impl PageId {
    /// The environment header page.
    pub const HEADER: Self = Self(0);

    /// Creates a new page ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw page number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Decodes a stored link, where zero means "none".
    #[must_use]
    pub(crate) const fn from_link(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Encodes an optional link, where zero means "none".
    #[must_use]
    pub(crate) fn to_link(page: Option<Self>) -> u64 {
        page.map_or(0, |p| p.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Stable internal identifier of a database.
///
/// Unlike the user-visible name, the ID survives renames, so transaction
/// change-sets and key locks stay attached to the right index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbId(pub u32);

impl DbId {
    /// Creates a new database ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "db:{}", self.0)
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within one
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Smallest valid database name.
pub const MIN_DB_NAME: u16 = 1;
/// Largest valid database name; higher values are reserved.
pub const MAX_DB_NAME: u16 = 0xEFFF;

/// Checks that a database name is in the user range.
pub(crate) fn validate_db_name(name: u16) -> CoreResult<()> {
    if (MIN_DB_NAME..=MAX_DB_NAME).contains(&name) {
        Ok(())
    } else {
        Err(CoreError::invalid_parameter(format!(
            "database name {name} is outside {MIN_DB_NAME}..={MAX_DB_NAME:#x}"
        )))
    }
}

/// Type of the keys of a database.
///
/// Numeric types are stored little-endian and compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyType {
    /// Arbitrary bytes, compared lexicographically.
    #[default]
    Binary,
    /// Arbitrary bytes, compared by a user comparator.
    Custom,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float.
    Real32,
    /// 64-bit float.
    Real64,
    /// Auto-assigned 32-bit record number.
    RecordNumber32,
    /// Auto-assigned 64-bit record number.
    RecordNumber64,
}

impl KeyType {
    /// Parses the value of the `KEY_TYPE` configuration parameter.
    ///
    /// Record-number types are selected with database flags, not this
    /// parameter.
    ///
    /// # Errors
    ///
    /// Returns `InvParameter` for unknown type codes.
    pub fn from_param(value: u64) -> CoreResult<Self> {
        match value {
            0 => Ok(Self::Binary),
            1 => Ok(Self::Custom),
            3 => Ok(Self::UInt8),
            5 => Ok(Self::UInt16),
            7 => Ok(Self::UInt32),
            9 => Ok(Self::UInt64),
            11 => Ok(Self::Real32),
            12 => Ok(Self::Real64),
            other => Err(CoreError::invalid_parameter(format!(
                "unknown key type {other}"
            ))),
        }
    }

    /// Returns the fixed key width implied by the type, if any.
    #[must_use]
    pub const fn fixed_size(self) -> Option<u16> {
        match self {
            Self::Binary | Self::Custom => None,
            Self::UInt8 => Some(1),
            Self::UInt16 => Some(2),
            Self::UInt32 | Self::Real32 | Self::RecordNumber32 => Some(4),
            Self::UInt64 | Self::Real64 | Self::RecordNumber64 => Some(8),
        }
    }

    /// Returns true for auto-assigned record-number keys.
    #[must_use]
    pub const fn is_record_number(self) -> bool {
        matches!(self, Self::RecordNumber32 | Self::RecordNumber64)
    }

    /// Returns the value type used when keys are streamed into a query.
    #[must_use]
    pub const fn value_type(self) -> RecordType {
        match self {
            Self::Binary | Self::Custom => RecordType::Binary,
            Self::UInt8 => RecordType::UInt8,
            Self::UInt16 => RecordType::UInt16,
            Self::UInt32 | Self::RecordNumber32 => RecordType::UInt32,
            Self::UInt64 | Self::RecordNumber64 => RecordType::UInt64,
            Self::Real32 => RecordType::Real32,
            Self::Real64 => RecordType::Real64,
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Binary => 0,
            Self::Custom => 1,
            Self::UInt8 => 2,
            Self::UInt16 => 3,
            Self::UInt32 => 4,
            Self::UInt64 => 5,
            Self::Real32 => 6,
            Self::Real64 => 7,
            Self::RecordNumber32 => 8,
            Self::RecordNumber64 => 9,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> CoreResult<Self> {
        Ok(match tag {
            0 => Self::Binary,
            1 => Self::Custom,
            2 => Self::UInt8,
            3 => Self::UInt16,
            4 => Self::UInt32,
            5 => Self::UInt64,
            6 => Self::Real32,
            7 => Self::Real64,
            8 => Self::RecordNumber32,
            9 => Self::RecordNumber64,
            other => return Err(CoreError::integrity(format!("unknown key type tag {other}"))),
        })
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Binary => "binary",
            Self::Custom => "custom",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Real32 => "real32",
            Self::Real64 => "real64",
            Self::RecordNumber32 => "recno32",
            Self::RecordNumber64 => "recno64",
        };
        f.write_str(name)
    }
}

/// Type of the records of a database, and of query result columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordType {
    /// Arbitrary bytes.
    #[default]
    Binary,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float.
    Real32,
    /// 64-bit float.
    Real64,
}

impl RecordType {
    /// Parses the value of the `RECORD_TYPE` configuration parameter.
    ///
    /// # Errors
    ///
    /// Returns `InvParameter` for unknown type codes.
    pub fn from_param(value: u64) -> CoreResult<Self> {
        match value {
            0 => Ok(Self::Binary),
            3 => Ok(Self::UInt8),
            5 => Ok(Self::UInt16),
            7 => Ok(Self::UInt32),
            9 => Ok(Self::UInt64),
            11 => Ok(Self::Real32),
            12 => Ok(Self::Real64),
            other => Err(CoreError::invalid_parameter(format!(
                "unknown record type {other}"
            ))),
        }
    }

    /// Returns the fixed width implied by the type, if any.
    #[must_use]
    pub const fn fixed_size(self) -> Option<u32> {
        match self {
            Self::Binary => None,
            Self::UInt8 => Some(1),
            Self::UInt16 => Some(2),
            Self::UInt32 | Self::Real32 => Some(4),
            Self::UInt64 | Self::Real64 => Some(8),
        }
    }

    /// Returns true for integer types.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    /// Returns true for floating point types.
    #[must_use]
    pub const fn is_real(self) -> bool {
        matches!(self, Self::Real32 | Self::Real64)
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Binary => 0,
            Self::UInt8 => 1,
            Self::UInt16 => 2,
            Self::UInt32 => 3,
            Self::UInt64 => 4,
            Self::Real32 => 5,
            Self::Real64 => 6,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> CoreResult<Self> {
        Ok(match tag {
            0 => Self::Binary,
            1 => Self::UInt8,
            2 => Self::UInt16,
            3 => Self::UInt32,
            4 => Self::UInt64,
            5 => Self::Real32,
            6 => Self::Real64,
            other => {
                return Err(CoreError::integrity(format!(
                    "unknown record type tag {other}"
                )))
            }
        })
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Binary => "binary",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Real32 => "real32",
            Self::Real64 => "real64",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_link_encoding() {
        assert_eq!(PageId::from_link(0), None);
        assert_eq!(PageId::from_link(7), Some(PageId(7)));
        assert_eq!(PageId::to_link(None), 0);
        assert_eq!(PageId::to_link(Some(PageId(9))), 9);
    }

    #[test]
    fn db_name_range() {
        assert!(validate_db_name(1).is_ok());
        assert!(validate_db_name(0xEFFF).is_ok());
        assert!(validate_db_name(0).is_err());
        assert!(validate_db_name(0xF000).is_err());
    }

    #[test]
    fn key_type_params() {
        assert_eq!(KeyType::from_param(7).unwrap(), KeyType::UInt32);
        assert_eq!(KeyType::from_param(1).unwrap(), KeyType::Custom);
        assert!(KeyType::from_param(2).is_err());
        assert_eq!(KeyType::UInt32.fixed_size(), Some(4));
        assert_eq!(KeyType::RecordNumber64.fixed_size(), Some(8));
        assert_eq!(KeyType::Binary.fixed_size(), None);
    }

    #[test]
    fn type_tags_round_trip() {
        for kt in [
            KeyType::Binary,
            KeyType::Custom,
            KeyType::UInt8,
            KeyType::UInt16,
            KeyType::UInt32,
            KeyType::UInt64,
            KeyType::Real32,
            KeyType::Real64,
            KeyType::RecordNumber32,
            KeyType::RecordNumber64,
        ] {
            assert_eq!(KeyType::from_tag(kt.tag()).unwrap(), kt);
        }
        assert!(RecordType::from_tag(42).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", TxnId::new(3)), "txn:3");
        assert_eq!(format!("{}", KeyType::RecordNumber32), "recno32");
        assert_eq!(format!("{}", RecordType::Real64), "real64");
    }
}
