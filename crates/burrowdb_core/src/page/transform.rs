//! Byte transforms applied to whole pages on their way to and from disk.

use crate::error::{CoreError, CoreResult};
use crate::types::PageId;

/// A reversible transform applied to every page written to the store.
///
/// The store reserves `page_size + overhead()` bytes per slot. `encode`
/// must return at most that many bytes (shorter output is zero-padded);
/// `decode` receives the full slot and must return exactly one page of
/// plaintext. Encryption and checksums are built in; compression can be
/// plugged in through this trait.
pub trait PageTransform: Send + Sync {
    /// Extra bytes per slot needed by the encoded form.
    fn overhead(&self) -> usize;

    /// Encodes one plaintext page.
    fn encode(&self, page: PageId, plain: &[u8]) -> CoreResult<Vec<u8>>;

    /// Decodes one slot back into plaintext.
    ///
    /// Damaged input must fail with `IntegrityViolated`.
    fn decode(&self, page: PageId, raw: &[u8]) -> CoreResult<Vec<u8>>;
}

/// Stores pages as they are.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Identity;

impl PageTransform for Identity {
    fn overhead(&self) -> usize {
        0
    }

    fn encode(&self, _page: PageId, plain: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn decode(&self, _page: PageId, raw: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(raw.to_vec())
    }
}

/// Appends a CRC32 over the page number and contents.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Crc32Trailer;

impl Crc32Trailer {
    fn checksum(page: PageId, data: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(8 + data.len());
        buf.extend_from_slice(&page.as_u64().to_le_bytes());
        buf.extend_from_slice(data);
        compute_crc32(&buf)
    }
}

impl PageTransform for Crc32Trailer {
    fn overhead(&self) -> usize {
        4
    }

    fn encode(&self, page: PageId, plain: &[u8]) -> CoreResult<Vec<u8>> {
        let mut out = Vec::with_capacity(plain.len() + 4);
        out.extend_from_slice(plain);
        out.extend_from_slice(&Self::checksum(page, plain).to_le_bytes());
        Ok(out)
    }

    fn decode(&self, page: PageId, raw: &[u8]) -> CoreResult<Vec<u8>> {
        if raw.len() < 4 {
            return Err(CoreError::integrity(format!("{page} is too short")));
        }
        let (data, trailer) = raw.split_at(raw.len() - 4);
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = Self::checksum(page, data);
        if stored != actual {
            return Err(CoreError::integrity(format!(
                "{page} checksum mismatch: expected {stored:08x}, got {actual:08x}"
            )));
        }
        Ok(data.to_vec())
    }
}

/// Computes CRC32 (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn identity_is_transparent() {
        let data = vec![1u8, 2, 3];
        let encoded = Identity.encode(PageId(1), &data).unwrap();
        assert_eq!(Identity.decode(PageId(1), &encoded).unwrap(), data);
        assert_eq!(Identity.overhead(), 0);
    }

    #[test]
    fn crc_detects_bit_flip() {
        let data = vec![0x55u8; 64];
        let mut encoded = Crc32Trailer.encode(PageId(4), &data).unwrap();
        assert_eq!(encoded.len(), 68);
        assert_eq!(Crc32Trailer.decode(PageId(4), &encoded).unwrap(), data);

        encoded[10] ^= 0x01;
        let err = Crc32Trailer.decode(PageId(4), &encoded).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IntegrityViolated);
    }

    #[test]
    fn crc_binds_page_number() {
        let encoded = Crc32Trailer.encode(PageId(4), b"page").unwrap();
        assert!(Crc32Trailer.decode(PageId(5), &encoded).is_err());
    }
}
