//! Key ordering.

use crate::context::CompareFn;
use crate::error::{CoreError, CoreResult};
use crate::types::KeyType;
use std::cmp::Ordering;
use std::fmt;

/// The ordering a database applies to its keys.
#[derive(Clone)]
pub(crate) enum KeyOrder {
    /// Lexicographic byte order (shorter key first on a common prefix).
    Bytes,
    /// Little-endian unsigned integers, compared by value.
    Unsigned,
    /// Little-endian `f32`, total order.
    Real32,
    /// Little-endian `f64`, total order.
    Real64,
    /// User comparator; `None` until one is installed.
    Custom(Option<CompareFn>),
}

impl KeyOrder {
    /// Builds the ordering for a key type.
    pub(crate) fn for_key_type(key_type: KeyType, custom: Option<CompareFn>) -> Self {
        match key_type {
            KeyType::Binary => Self::Bytes,
            KeyType::Custom => Self::Custom(custom),
            KeyType::UInt8
            | KeyType::UInt16
            | KeyType::UInt32
            | KeyType::UInt64
            | KeyType::RecordNumber32
            | KeyType::RecordNumber64 => Self::Unsigned,
            KeyType::Real32 => Self::Real32,
            KeyType::Real64 => Self::Real64,
        }
    }

    /// Compares two keys.
    ///
    /// # Errors
    ///
    /// A custom ordering without a comparator fails with `NotReady`; an error
    /// raised by the comparator is returned unchanged as `Callback`.
    pub(crate) fn compare(&self, a: &[u8], b: &[u8]) -> CoreResult<Ordering> {
        match self {
            Self::Bytes => Ok(a.cmp(b)),
            Self::Unsigned => Ok(read_unsigned(a).cmp(&read_unsigned(b))),
            Self::Real32 => Ok(read_f32(a).total_cmp(&read_f32(b))),
            Self::Real64 => Ok(read_f64(a).total_cmp(&read_f64(b))),
            Self::Custom(Some(cmp)) => cmp(a, b).map_err(CoreError::Callback),
            Self::Custom(None) => Err(CoreError::not_ready(
                "custom key type has no comparator installed",
            )),
        }
    }
}

impl fmt::Debug for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes => f.write_str("Bytes"),
            Self::Unsigned => f.write_str("Unsigned"),
            Self::Real32 => f.write_str("Real32"),
            Self::Real64 => f.write_str("Real64"),
            Self::Custom(cmp) => write!(f, "Custom(installed: {})", cmp.is_some()),
        }
    }
}

/// Reads up to 8 little-endian bytes as an unsigned integer.
pub(crate) fn read_unsigned(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    u64::from_le_bytes(buf)
}

pub(crate) fn read_f32(bytes: &[u8]) -> f32 {
    let mut buf = [0u8; 4];
    let len = bytes.len().min(4);
    buf[..len].copy_from_slice(&bytes[..len]);
    f32::from_le_bytes(buf)
}

pub(crate) fn read_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    f64::from_le_bytes(buf)
}
