//! Working key derivation
//!
//! Every container stores a random salt in its descriptor. The master key and
//! that salt are turned into a pseudorandom key once, and independent working
//! keys are expanded from it with distinct HKDF labels.

use std::fmt;

use aes_gcm::aead::{OsRng, rand_core::RngCore};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::MasterKey;

/// Size of the per-file salt
pub const SALT_SIZE: usize = 16;

/// Size of every derived working key
pub const DERIVED_KEY_SIZE: usize = 32;

/// Default number of PBKDF2 iterations
pub const DEFAULT_PBKDF2_ROUNDS: u32 = 10_000;

/// HKDF label for the chunk encryption key
pub const CHUNK_KEY_INFO: &[u8] = b"strongbox chunk";

/// HKDF label for the stream encryption key
pub const STREAM_KEY_INFO: &[u8] = b"strongbox stream";

/// HKDF label for the stamp MAC key
pub const MAC_KEY_INFO: &[u8] = b"mac";

/// Key derivation function stored in the container descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum KdfType {
    /// HKDF-SHA256 directly over the master key
    #[default]
    Hkdf = 1,
    /// PBKDF2-HMAC-SHA256 stretching followed by HKDF-SHA256
    Pbkdf2Hkdf = 2,
}

impl KdfType {
    /// Parse from byte value
    pub fn from_byte(byte: u8) -> CryptoResult<Self> {
        match byte {
            1 => Ok(Self::Hkdf),
            2 => Ok(Self::Pbkdf2Hkdf),
            other => Err(CryptoError::UnknownKdf(other)),
        }
    }

    /// Byte value stored on disk
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Derives working keys for one container
#[derive(Clone)]
pub struct KeyDeriver {
    hkdf: Hkdf<Sha256>,
}

impl KeyDeriver {
    /// Set up derivation for the given master key and descriptor parameters
    pub fn new(
        master: &MasterKey,
        kdf: KdfType,
        salt: &[u8],
        rounds: u32,
    ) -> CryptoResult<Self> {
        let hkdf = match kdf {
            KdfType::Hkdf => Hkdf::<Sha256>::new(Some(salt), master.as_bytes()),
            KdfType::Pbkdf2Hkdf => {
                if rounds == 0 {
                    return Err(CryptoError::KeyDerivation(
                        "PBKDF2 requires at least one round".to_string(),
                    ));
                }
                let mut stretched = [0u8; DERIVED_KEY_SIZE];
                pbkdf2::pbkdf2_hmac::<Sha256>(master.as_bytes(), salt, rounds, &mut stretched);
                let hkdf = Hkdf::<Sha256>::new(Some(salt), &stretched);
                stretched.fill(0);
                hkdf
            }
        };
        Ok(Self { hkdf })
    }

    /// Expand a working key for the given label
    pub fn derive(&self, info: &[u8]) -> CryptoResult<[u8; DERIVED_KEY_SIZE]> {
        let mut okm = [0u8; DERIVED_KEY_SIZE];
        self.hkdf
            .expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(okm)
    }

    /// Generate a fresh random salt
    pub fn generate_salt() -> [u8; SALT_SIZE] {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        salt
    }
}

impl fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDeriver").finish_non_exhaustive()
    }
}
