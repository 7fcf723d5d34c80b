//! Cryptographic primitives for strongbox encrypted containers
//!
//! This crate provides the building blocks used by the container processor
//! to protect chunk data and to stamp whole files.
//!
//! # Components
//!
//! - **Key derivation**: HKDF-SHA256, optionally preceded by PBKDF2 stretching
//! - **Block encryption**: AES-256-GCM per chunk, sequence number bound as AAD
//! - **Stream encryption**: seekable Salsa20 for forward-only streaming files
//! - **Integrity**: SHA-256 digests and HMAC-SHA256 MACs
//!
//! # Examples
//!
//! ```
//! use strongbox_crypto::{ChunkCipher, KdfType, KeyDeriver, MasterKey, kdf};
//!
//! let master = MasterKey::generate();
//! let salt = KeyDeriver::generate_salt();
//! let deriver = KeyDeriver::new(&master, KdfType::Hkdf, &salt, 0).unwrap();
//! let cipher = ChunkCipher::new(&deriver.derive(kdf::CHUNK_KEY_INFO).unwrap());
//!
//! let packed = cipher.seal(b"secret", 0).unwrap();
//! assert_eq!(cipher.open(&packed, 0).unwrap(), b"secret");
//! ```

#![warn(missing_docs)]

pub mod aead;
pub mod digest;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod stream;
pub mod suite;

pub use error::{CryptoError, CryptoResult};

// Re-export commonly used types
pub use aead::ChunkCipher;
pub use digest::{StampHasher, StampKind};
pub use kdf::{KdfType, KeyDeriver};
pub use keys::MasterKey;
pub use stream::StreamEncryptor;
pub use suite::CipherSuite;
