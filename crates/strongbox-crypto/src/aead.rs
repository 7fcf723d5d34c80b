//! AES-256-GCM chunk encryption
//!
//! Packed chunk layout:
//!
//! ```text
//! nonce (12) | ciphertext | tag (16)
//! ```
//!
//! The chunk sequence number is bound as associated data so that a chunk
//! copied to another slot fails to authenticate.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DERIVED_KEY_SIZE;

/// AES-GCM nonce size
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size
pub const TAG_SIZE: usize = 16;

/// Bytes added to every packed chunk
pub const CHUNK_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypts and decrypts individual chunks
pub struct ChunkCipher {
    cipher: Aes256Gcm,
}

impl ChunkCipher {
    /// Create a chunk cipher from a derived key
    pub fn new(key: &[u8; DERIVED_KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt one chunk with a fresh random nonce
    pub fn seal(&self, plaintext: &[u8], seqnum: u32) -> CryptoResult<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = seqnum.to_le_bytes();
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(format!("AES-GCM: {e}")))?;

        let mut packed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&ciphertext);
        Ok(packed)
    }

    /// Decrypt and authenticate one chunk
    pub fn open(&self, packed: &[u8], seqnum: u32) -> CryptoResult<Vec<u8>> {
        if packed.len() < CHUNK_OVERHEAD {
            return Err(CryptoError::InvalidCiphertext {
                expected: CHUNK_OVERHEAD,
                actual: packed.len(),
            });
        }

        let (nonce, ciphertext) = packed.split_at(NONCE_SIZE);
        let aad = seqnum.to_le_bytes();
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed { seqnum })
    }
}
