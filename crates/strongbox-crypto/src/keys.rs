//! Master key handling
//!
//! A container is protected by a single master key. All working keys (chunk,
//! stream and MAC keys) are derived from it together with the per-file salt,
//! see [`crate::kdf`].

use std::fmt;

use aes_gcm::aead::{OsRng, rand_core::RngCore};

use crate::error::{CryptoError, CryptoResult};

/// Size of a generated master key in bytes
pub const MASTER_KEY_SIZE: usize = 32;

/// Secret input to key derivation.
///
/// Raw keys are exactly [`MASTER_KEY_SIZE`] bytes. Passphrases may have any
/// non-empty length and are meant to be combined with
/// [`KdfType::Pbkdf2Hkdf`](crate::kdf::KdfType::Pbkdf2Hkdf).
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey {
    bytes: Vec<u8>,
}

impl MasterKey {
    /// Create a master key from raw key bytes
    pub fn new(key: [u8; MASTER_KEY_SIZE]) -> Self {
        Self { bytes: key.to_vec() }
    }

    /// Generate a random master key
    pub fn generate() -> Self {
        let mut key = [0u8; MASTER_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Parse key from hex string
    pub fn from_hex(hex: &str) -> CryptoResult<Self> {
        let hex = hex.trim();
        let bytes = hex::decode(hex)
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("invalid hex: {e}")))?;

        if bytes.len() != MASTER_KEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                expected: MASTER_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        Ok(Self { bytes })
    }

    /// Use a passphrase as key material
    pub fn from_passphrase(passphrase: &str) -> CryptoResult<Self> {
        if passphrase.is_empty() {
            return Err(CryptoError::InvalidKeyFormat(
                "empty passphrase".to_string(),
            ));
        }
        Ok(Self {
            bytes: passphrase.as_bytes().to_vec(),
        })
    }

    /// Key material
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.fill(0);
    }
}
