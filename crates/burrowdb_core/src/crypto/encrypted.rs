//! AES-256-GCM page cipher.

use crate::error::{CoreError, CoreResult};
use crate::page::PageTransform;
use crate::types::PageId;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the per-file key derivation salt.
pub const SALT_SIZE: usize = 16;

const KDF_INFO: &[u8] = b"burrowdb-page-key-v1";

/// Generates a random key derivation salt for a new file.
#[must_use]
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derived AES-256 page key.
///
/// The key is automatically zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PageKey {
    bytes: [u8; KEY_SIZE],
}

impl PageKey {
    /// Derives the page key from user key material and the file's salt
    /// using HKDF-SHA256.
    ///
    /// HKDF is not a password hash; the key material should already carry
    /// enough entropy.
    pub fn derive(key_material: &[u8], salt: &[u8; SALT_SIZE]) -> CoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        if key_material.is_empty() {
            return Err(CoreError::invalid_parameter("encryption key is empty"));
        }

        let hk = Hkdf::<Sha256>::new(Some(salt), key_material);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(KDF_INFO, &mut bytes)
            .map_err(|_| CoreError::internal("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypts and authenticates whole pages.
///
/// Slot layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`, with the
/// page number as associated data.
pub struct PageCipher {
    cipher: Aes256Gcm,
}

impl PageCipher {
    /// Creates a cipher from user key material and the file's salt.
    ///
    /// # Errors
    ///
    /// Returns `InvParameter` if the key material is empty.
    pub fn new(key_material: &[u8], salt: &[u8; SALT_SIZE]) -> CoreResult<Self> {
        let key = PageKey::derive(key_material, salt)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Ok(Self { cipher })
    }
}

impl PageTransform for PageCipher {
    fn overhead(&self) -> usize {
        NONCE_SIZE + TAG_SIZE
    }

    fn encode(&self, page: PageId, plain: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let aad = page.as_u64().to_le_bytes();
        let ciphertext = self
            .cipher
            .encrypt(nonce, Payload { msg: plain, aad: &aad })
            .map_err(|_| CoreError::internal("page encryption failed"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    fn decode(&self, page: PageId, raw: &[u8]) -> CoreResult<Vec<u8>> {
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::integrity(format!("{page} is too short to decrypt")));
        }

        let nonce = Nonce::from_slice(&raw[..NONCE_SIZE]);
        let aad = page.as_u64().to_le_bytes();
        self.cipher
            .decrypt(nonce, Payload { msg: &raw[NONCE_SIZE..], aad: &aad })
            .map_err(|_| {
                CoreError::integrity(format!(
                    "{page} failed authentication (wrong key or damaged data)"
                ))
            })
    }
}

impl std::fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}
