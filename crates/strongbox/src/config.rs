//! Configuration for containers and the container processor

use serde::{Deserialize, Serialize};
use strongbox_crypto::kdf::DEFAULT_PBKDF2_ROUNDS;
use strongbox_crypto::{CipherSuite, KdfType};

use crate::{CryptFileError, Result};

/// Default number of chunks kept in memory per container
pub const DEFAULT_MAX_CACHED_CHUNKS: usize = 8;

/// Default block size for zero-filling and stamp hashing (1 MiB)
pub const DEFAULT_MAX_PROCESSING_SIZE: usize = 0x10_0000;

/// Default maximum plaintext size of a chunk (16 KiB)
pub const DEFAULT_CHUNK_MAX_SIZE: u32 = 16 * 1024;

/// Runtime behaviour of an open container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Chunks held in memory, the active chunk included
    pub max_cached_chunks: usize,

    /// Block size used when growing a file and when hashing it
    pub max_processing_size: usize,

    /// Allow the chunk cache in modes that benefit from it
    pub cache_enabled: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_cached_chunks: DEFAULT_MAX_CACHED_CHUNKS,
            max_processing_size: DEFAULT_MAX_PROCESSING_SIZE,
            cache_enabled: true,
        }
    }
}

impl ContainerConfig {
    /// Set the number of chunks kept in memory
    #[must_use]
    pub const fn with_max_cached_chunks(mut self, count: usize) -> Self {
        self.max_cached_chunks = count;
        self
    }

    /// Set the processing block size
    #[must_use]
    pub const fn with_max_processing_size(mut self, size: usize) -> Self {
        self.max_processing_size = size;
        self
    }

    /// Enable or disable the chunk cache
    #[must_use]
    pub const fn with_cache(mut self, enable: bool) -> Self {
        self.cache_enabled = enable;
        self
    }

    /// Reject unusable values
    pub fn validate(&self) -> Result<()> {
        if self.max_cached_chunks == 0 {
            return Err(CryptFileError::InvalidConfig(
                "max_cached_chunks must be at least 1".to_string(),
            ));
        }
        if self.max_processing_size == 0 {
            return Err(CryptFileError::InvalidConfig(
                "max_processing_size must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters written to the descriptor of new containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Cipher suite
    pub cipher_suite: CipherSuite,

    /// Key derivation function
    pub kdf_type: KdfType,

    /// PBKDF2 iterations when `kdf_type` uses PBKDF2
    pub kdf_rounds: u32,

    /// Maximum plaintext size of chunk 0 (0 = same as `chunk_max_size`)
    pub first_chunk_max_size: u32,

    /// Maximum plaintext size of every other chunk (0 = unbounded)
    pub chunk_max_size: u32,

    /// Encrypt with the stream cipher instead of per-chunk AEAD
    pub streaming: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            cipher_suite: CipherSuite::default(),
            kdf_type: KdfType::default(),
            kdf_rounds: DEFAULT_PBKDF2_ROUNDS,
            first_chunk_max_size: 0,
            chunk_max_size: DEFAULT_CHUNK_MAX_SIZE,
            streaming: false,
        }
    }
}

impl ProcessorConfig {
    /// Set the cipher suite
    #[must_use]
    pub const fn with_cipher_suite(mut self, suite: CipherSuite) -> Self {
        self.cipher_suite = suite;
        self
    }

    /// Set the key derivation function and its round count
    #[must_use]
    pub const fn with_kdf(mut self, kdf_type: KdfType, rounds: u32) -> Self {
        self.kdf_type = kdf_type;
        self.kdf_rounds = rounds;
        self
    }

    /// Set the chunk size policy
    #[must_use]
    pub const fn with_chunk_sizes(mut self, first_chunk_max_size: u32, chunk_max_size: u32) -> Self {
        self.first_chunk_max_size = first_chunk_max_size;
        self.chunk_max_size = chunk_max_size;
        self
    }

    /// Enable or disable streaming mode
    #[must_use]
    pub const fn with_streaming(mut self, enable: bool) -> Self {
        self.streaming = enable;
        self
    }

    /// Reject unusable combinations
    pub fn validate(&self) -> Result<()> {
        if self.streaming && !self.cipher_suite.supports_streaming() {
            return Err(CryptFileError::NotSupportedByCipherSuite(format!(
                "{} has no stream cipher",
                self.cipher_suite.name()
            )));
        }
        if self.kdf_type == KdfType::Pbkdf2Hkdf && self.kdf_rounds == 0 {
            return Err(CryptFileError::InvalidConfig(
                "PBKDF2 needs at least one round".to_string(),
            ));
        }
        Ok(())
    }
}
