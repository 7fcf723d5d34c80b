//! Digest and MAC accumulators for integrity stamps

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::DERIVED_KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Size of a SHA-256 digest and of an HMAC-SHA256 tag
pub const DIGEST_SIZE: usize = 32;

/// Kind of integrity value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampKind {
    /// Unkeyed SHA-256 digest
    Digest,
    /// HMAC-SHA256 keyed with the container MAC key
    Mac,
}

/// Incremental hasher for either kind of stamp
#[derive(Clone)]
pub enum StampHasher {
    /// SHA-256
    Digest(Sha256),
    /// HMAC-SHA256
    Mac(HmacSha256),
}

impl StampHasher {
    /// Unkeyed digest
    pub fn digest() -> Self {
        Self::Digest(Sha256::new())
    }

    /// Keyed MAC
    pub fn mac(key: &[u8; DERIVED_KEY_SIZE]) -> CryptoResult<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| {
            CryptoError::InvalidKeySize {
                expected: DERIVED_KEY_SIZE,
                actual: key.len(),
            }
        })?;
        Ok(Self::Mac(mac))
    }

    /// Which kind of value this hasher produces
    pub const fn kind(&self) -> StampKind {
        match self {
            Self::Digest(_) => StampKind::Digest,
            Self::Mac(_) => StampKind::Mac,
        }
    }

    /// Feed data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Digest(hasher) => Digest::update(hasher, data),
            Self::Mac(mac) => Mac::update(mac, data),
        }
    }

    /// Produce the final value
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Digest(hasher) => Digest::finalize(hasher).to_vec(),
            Self::Mac(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }

    /// Compare against an expected value
    pub fn verify(self, expected: &[u8]) -> CryptoResult<()> {
        match self {
            Self::Digest(hasher) => {
                if Digest::finalize(hasher).as_slice() == expected {
                    Ok(())
                } else {
                    Err(CryptoError::DigestMismatch)
                }
            }
            Self::Mac(mac) => mac.verify_slice(expected).map_err(|_| CryptoError::MacMismatch),
        }
    }
}
