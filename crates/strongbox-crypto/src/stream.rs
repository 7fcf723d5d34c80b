//! Salsa20 stream encryption for streaming containers
//!
//! A streaming chunk is stored as an 8-byte random nonce followed by the
//! Salsa20 ciphertext. Ciphertext length equals plaintext length, so bytes
//! can be appended to a chunk without touching what was already written.

use aes_gcm::aead::{OsRng, rand_core::RngCore};
use cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use salsa20::Salsa20;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DERIVED_KEY_SIZE;

/// Salsa20 nonce size, stored as the per-chunk stream prefix
pub const STREAM_NONCE_SIZE: usize = 8;

/// Keystream state for one streaming chunk
pub struct StreamEncryptor {
    cipher: Salsa20,
    seqnum: u32,
    position: u64,
}

impl StreamEncryptor {
    /// Create an encryptor positioned at the start of the keystream
    pub fn new(key: &[u8; DERIVED_KEY_SIZE], nonce: &[u8], seqnum: u32) -> CryptoResult<Self> {
        if nonce.len() != STREAM_NONCE_SIZE {
            return Err(CryptoError::InvalidIvSize {
                expected: STREAM_NONCE_SIZE,
                actual: nonce.len(),
            });
        }

        Ok(Self {
            cipher: Salsa20::new(
                salsa20::Key::from_slice(key),
                salsa20::Nonce::from_slice(nonce),
            ),
            seqnum,
            position: 0,
        })
    }

    /// Generate a random stream nonce
    pub fn generate_nonce() -> [u8; STREAM_NONCE_SIZE] {
        let mut nonce = [0u8; STREAM_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Move the keystream to an absolute byte offset within the chunk
    pub fn seek(&mut self, offset: u64) -> CryptoResult<()> {
        self.cipher
            .try_seek(offset)
            .map_err(|e| CryptoError::EncryptionFailed(format!("Salsa20 seek: {e}")))?;
        self.position = offset;
        Ok(())
    }

    /// Encrypt or decrypt in place
    pub fn apply_keystream(&mut self, data: &mut [u8]) -> CryptoResult<()> {
        self.cipher
            .try_apply_keystream(data)
            .map_err(|e| CryptoError::EncryptionFailed(format!("Salsa20: {e}")))?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Sequence number of the chunk this encryptor belongs to
    pub const fn seqnum(&self) -> u32 {
        self.seqnum
    }

    /// Keystream offset of the next byte
    pub const fn position(&self) -> u64 {
        self.position
    }
}

/// Decrypt a whole streaming chunk (prefix included)
pub fn open_stream_chunk(key: &[u8; DERIVED_KEY_SIZE], packed: &[u8]) -> CryptoResult<Vec<u8>> {
    if packed.len() < STREAM_NONCE_SIZE {
        return Err(CryptoError::InvalidCiphertext {
            expected: STREAM_NONCE_SIZE,
            actual: packed.len(),
        });
    }
    let (nonce, ciphertext) = packed.split_at(STREAM_NONCE_SIZE);
    let mut plain = ciphertext.to_vec();
    StreamEncryptor::new(key, nonce, 0)?.apply_keystream(&mut plain)?;
    Ok(plain)
}
