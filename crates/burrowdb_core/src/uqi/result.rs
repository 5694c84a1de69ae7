use crate::types::{KeyType, RecordType};

/// One row of a query result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UqiRow {
    /// Key column; may be empty.
    pub key: Vec<u8>,
    /// Record column; may be empty.
    pub record: Vec<u8>,
}

/// Result of [`Environment::select`](crate::Environment::select).
///
/// Fixed-width values are little-endian. Aggregates such as `COUNT` produce
/// a single row whose key names the function and whose record holds the
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UqiResult {
    /// Type of the key column.
    pub key_type: KeyType,
    /// Type of the record column.
    pub record_type: RecordType,
    /// Rows in result order.
    pub rows: Vec<UqiRow>,
}

impl UqiResult {
    pub(crate) fn new(key_type: KeyType, record_type: RecordType) -> Self {
        Self {
            key_type,
            record_type,
            rows: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, key: Vec<u8>, record: Vec<u8>) {
        self.rows.push(UqiRow { key, record });
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Key of row `index`.
    #[must_use]
    pub fn key(&self, index: usize) -> Option<&[u8]> {
        self.rows.get(index).map(|row| row.key.as_slice())
    }

    /// Record of row `index`.
    #[must_use]
    pub fn record(&self, index: usize) -> Option<&[u8]> {
        self.rows.get(index).map(|row| row.record.as_slice())
    }

    /// Record of row `index` as an unsigned integer of its stored width.
    #[must_use]
    pub fn record_u64(&self, index: usize) -> Option<u64> {
        self.record(index).and_then(le_u64)
    }

    /// Record of row `index` as a float (`Real32` or `Real64`).
    #[must_use]
    pub fn record_f64(&self, index: usize) -> Option<f64> {
        self.record(index).and_then(le_f64)
    }

    /// Key of row `index` as an unsigned integer of its stored width.
    #[must_use]
    pub fn key_u64(&self, index: usize) -> Option<u64> {
        self.key(index).and_then(le_u64)
    }
}

fn le_u64(bytes: &[u8]) -> Option<u64> {
    match bytes.len() {
        1 | 2 | 4 | 8 => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            Some(u64::from_le_bytes(buf))
        }
        _ => None,
    }
}

fn le_f64(bytes: &[u8]) -> Option<f64> {
    match bytes.len() {
        4 => Some(f64::from(f32::from_le_bytes(bytes.try_into().ok()?))),
        8 => Some(f64::from_le_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut result = UqiResult::new(KeyType::Binary, RecordType::UInt64);
        result.push(b"COUNT".to_vec(), 42u64.to_le_bytes().to_vec());
        result.push(7u16.to_le_bytes().to_vec(), 2.5f32.to_le_bytes().to_vec());

        assert_eq!(result.row_count(), 2);
        assert_eq!(result.key(0), Some(&b"COUNT"[..]));
        assert_eq!(result.record_u64(0), Some(42));
        assert_eq!(result.key_u64(1), Some(7));
        assert_eq!(result.record_f64(1), Some(2.5));
        assert_eq!(result.key_u64(0), None);
        assert_eq!(result.record(2), None);
    }
}
