//! Page encryption.
//!
//! Pages can be encrypted at rest with AES-256-GCM. Encryption is optional
//! and must be enabled via the `encryption` feature.
//!
//! ## Security Model
//!
//! - AES-256-GCM authenticated encryption, one random nonce per page write
//! - The page number is bound to the ciphertext as associated data, so a
//!   page copied to another slot fails to decrypt
//! - The page key is derived from the user's key material with HKDF-SHA256
//!   and a random per-file salt stored in the superblock
//! - Keys are zeroized on drop
//!
//! A wrong key or a damaged page fails authentication and surfaces as
//! `IntegrityViolated`, never as garbage plaintext.

#[cfg(feature = "encryption")]
mod encrypted;

#[cfg(feature = "encryption")]
pub use encrypted::*;

/// Module contents when encryption feature is disabled.
#[cfg(not(feature = "encryption"))]
mod stub {
    use crate::error::{CoreError, CoreResult};
    use crate::page::PageTransform;
    use crate::types::PageId;

    /// Size of the per-file key derivation salt.
    pub const SALT_SIZE: usize = 16;

    /// Returns an all-zero salt; nothing is encrypted in this build.
    #[must_use]
    pub fn generate_salt() -> [u8; SALT_SIZE] {
        [0u8; SALT_SIZE]
    }

    /// Page cipher (stub when encryption disabled).
    #[derive(Debug)]
    pub struct PageCipher {
        _private: (),
    }

    impl PageCipher {
        /// Always returns an error when encryption is disabled.
        pub fn new(_key_material: &[u8], _salt: &[u8; SALT_SIZE]) -> CoreResult<Self> {
            Err(CoreError::not_implemented(
                "built without the `encryption` feature",
            ))
        }
    }

    impl PageTransform for PageCipher {
        fn overhead(&self) -> usize {
            0
        }

        fn encode(&self, _page: PageId, _plain: &[u8]) -> CoreResult<Vec<u8>> {
            Err(CoreError::not_implemented(
                "built without the `encryption` feature",
            ))
        }

        fn decode(&self, _page: PageId, _raw: &[u8]) -> CoreResult<Vec<u8>> {
            Err(CoreError::not_implemented(
                "built without the `encryption` feature",
            ))
        }
    }
}

#[cfg(not(feature = "encryption"))]
pub use stub::*;
