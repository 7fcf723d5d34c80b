//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("Invalid key size: expected {expected}, got {actual}")]
    InvalidKeySize {
        /// Expected key size in bytes
        expected: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Invalid IV size
    #[error("Invalid IV size: expected {expected}, got {actual}")]
    InvalidIvSize {
        /// Expected IV size in bytes
        expected: usize,
        /// Actual IV size in bytes
        actual: usize,
    },

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Chunk ciphertext did not authenticate
    #[error("Authentication failed for chunk {seqnum}")]
    AuthenticationFailed {
        /// Sequence number of the chunk
        seqnum: u32,
    },

    /// Ciphertext shorter than the fixed packing overhead
    #[error("Invalid ciphertext: need at least {expected} bytes, got {actual}")]
    InvalidCiphertext {
        /// Minimum ciphertext length in bytes
        expected: usize,
        /// Actual ciphertext length in bytes
        actual: usize,
    },

    /// Unknown key derivation function identifier
    #[error("Unknown KDF type: {0}")]
    UnknownKdf(u8),

    /// Unknown cipher suite identifier
    #[error("Unknown cipher suite: {0}")]
    UnknownCipherSuite(u8),

    /// Stream encryptor used before initialization
    #[error("Stream encryptor is not initialized")]
    StreamNotInitialized,

    /// Working keys requested before the descriptor was processed
    #[error("Working keys are not derived")]
    NoWorkingKey,

    /// Digest does not match the expected value
    #[error("Digest mismatch")]
    DigestMismatch,

    /// MAC does not match the expected value
    #[error("MAC verification failed")]
    MacMismatch,
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = std::result::Result<T, CryptoError>;
