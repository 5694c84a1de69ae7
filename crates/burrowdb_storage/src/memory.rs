//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend stores all data in memory and is used for:
/// - In-memory environments (nothing is persisted)
/// - Unit and integration tests
///
/// # Example
///
/// ```rust
/// use burrowdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.write_at(0, b"test data").unwrap();
/// assert_eq!(backend.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory backend with pre-existing data.
    ///
    /// Useful for testing corruption and format checks.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + new_data.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn set_len(&mut self, len: u64) -> StorageResult<()> {
        self.data.write().resize(len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // In-memory backend has no pending writes
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn memory_write_grows_storage() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(4, b"abcd").unwrap();

        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.read_at(0, 8).unwrap(), b"\0\0\0\0abcd");
    }

    #[test]
    fn memory_overwrite_in_place() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello world").unwrap();
        backend.write_at(6, b"WORLD").unwrap();

        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello WORLD");
    }

    #[test]
    fn memory_read_at_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));

        let result = backend.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn memory_empty_read() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello").unwrap();

        let data = backend.read_at(2, 0).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn memory_with_data() {
        let backend = InMemoryBackend::with_data(b"preloaded".to_vec());
        assert_eq!(backend.size().unwrap(), 9);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"preloaded");
    }

    #[test]
    fn memory_set_len() {
        let mut backend = InMemoryBackend::new();
        backend.write_at(0, b"hello world").unwrap();

        backend.set_len(5).unwrap();
        assert_eq!(backend.read_at(0, 5).unwrap(), b"hello");

        backend.set_len(7).unwrap();
        assert_eq!(backend.read_at(0, 7).unwrap(), b"hello\0\0");
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn write_then_read_returns_same_bytes(
                offset in 0u64..4096,
                data in proptest::collection::vec(any::<u8>(), 0..512),
            ) {
                let mut backend = InMemoryBackend::new();
                backend.write_at(offset, &data).unwrap();
                let read = backend.read_at(offset, data.len()).unwrap();
                prop_assert_eq!(read, data);
            }
        }
    }
}
