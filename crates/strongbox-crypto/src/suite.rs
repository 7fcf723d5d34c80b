//! Cipher suite selection

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// Algorithms used to protect a container.
///
/// Both suites encrypt block-mode chunks with AES-256-GCM, hash with SHA-256
/// and sign stamps with HMAC-SHA256. Only [`CipherSuite::Aes256GcmSalsa20`]
/// provides a stream cipher for streaming containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CipherSuite {
    /// AES-256-GCM chunks, no streaming support
    Aes256Gcm = 1,
    /// AES-256-GCM chunks plus Salsa20 streaming
    #[default]
    Aes256GcmSalsa20 = 2,
}

impl CipherSuite {
    /// Parse from byte value
    pub fn from_byte(byte: u8) -> CryptoResult<Self> {
        match byte {
            1 => Ok(Self::Aes256Gcm),
            2 => Ok(Self::Aes256GcmSalsa20),
            other => Err(CryptoError::UnknownCipherSuite(other)),
        }
    }

    /// Byte value stored on disk
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the suite has a stream cipher
    pub const fn supports_streaming(self) -> bool {
        matches!(self, Self::Aes256GcmSalsa20)
    }

    /// Human readable name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::Aes256GcmSalsa20 => "AES-256-GCM+Salsa20",
        }
    }
}
