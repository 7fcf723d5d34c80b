//! Encrypted, randomly seekable chunked container files.
//!
//! A container looks to its caller like an ordinary seekable byte stream,
//! but its payload is split into chunks that are encrypted independently.
//! Decrypted chunks are kept in a small LRU pool so random access does not
//! decrypt the same chunk over and over.
//!
//! # File layout
//!
//! ```text
//! [ header ]        magic, version, descriptor length, plaintext size, ciphertext size
//! [ descriptor ]    key derivation, cipher suite, chunk size policy, salt
//! [ chunk 0 ]       first chunk, may differ in size from the others
//! [ chunk 1..N ]
//! [ stamp ]         optional digest and MAC of everything before it
//! ```
//!
//! Two cipher modes exist:
//!
//! - **Block mode**: every chunk is sealed with AES-256-GCM and may be
//!   rewritten in any order.
//! - **Streaming mode**: chunks are produced once by a stream cipher and
//!   only appended to. Only `Scan`, `Append` and `AppendExisting` opens are
//!   allowed.
//!
//! # Example
//!
//! ```rust,no_run
//! use strongbox::{CryptFile, OpenMode, ProcessorConfig};
//! use strongbox_crypto::MasterKey;
//!
//! # fn example() -> strongbox::Result<()> {
//! let key = MasterKey::generate();
//! let mut file = CryptFile::new("secret.sbx", key, ProcessorConfig::default())?;
//! file.open(OpenMode::Write)?;
//! file.write(b"hello world")?;
//! file.seek(6)?;
//! let mut buf = [0u8; 5];
//! file.read(&mut buf)?;
//! assert_eq!(&buf, b"world");
//! file.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::io;

use strongbox_crypto::CryptoError;
use strongbox_formats::FormatError;
use thiserror::Error;

// Raw file access
pub mod backing;

// Chunk pool
pub mod cache;

// In-memory chunk
pub mod chunk;

// Configuration
pub mod config;

// The container
pub mod container;

// Position and offset arithmetic
pub mod layout;

// Open modes
pub mod mode;

// Encryption and metadata
pub mod processor;

// Integrity stamps
mod stamp;

pub use backing::{BackingFile, PlainFile};
pub use cache::ChunkCache;
pub use chunk::Chunk;
pub use config::{ContainerConfig, ProcessorConfig};
pub use container::CryptFile;
pub use layout::ChunkLayout;
pub use mode::OpenMode;
pub use processor::{ContainerProcessor, HeaderInfo, Processor};
pub use strongbox_crypto::StampKind;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, CryptFileError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum CryptFileError {
    /// Operation needs an open container.
    #[error("File is not open")]
    FileNotOpen,

    /// Operation needs a closed container.
    #[error("File is already open")]
    FileAlreadyOpen,

    /// Reading is not possible in the current mode or failed.
    #[error("File read failed")]
    FileReadFailed,

    /// Writing is not possible in the current mode or failed.
    #[error("File write failed")]
    FileWriteFailed,

    /// The raw file is shorter than its metadata claims.
    #[error("Invalid file size")]
    InvalidSize,

    /// Seek target is not reachable in the current mode.
    #[error("Invalid seek to {pos} (size {size})")]
    InvalidSeek {
        /// Requested position
        pos: u64,
        /// Logical size at the time
        size: u64,
    },

    /// Malformed header, descriptor or chunk region.
    #[error("Invalid container format: {0}")]
    InvalidCryptfileFormat(String),

    /// Streaming mode combined with a random-access open mode, or a
    /// container opened in the wrong cipher mode.
    #[error("Invalid open mode for a streaming container")]
    InvalidStreamFileMode,

    /// Stamp missing, malformed or lacking the requested field.
    #[error("File stamp failed: {0}")]
    FileStampFailed(String),

    /// Requested feature is not provided by the cipher suite.
    #[error("Not supported by cipher suite: {0}")]
    NotSupportedByCipherSuite(String),

    /// Truncate finished with an unexpected size.
    #[error("Operation aborted: expected size {expected}, got {actual}")]
    Aborted {
        /// Requested size
        expected: u64,
        /// Size reached
        actual: u64,
    },

    /// Configuration rejected.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Cryptographic failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Wire format failure.
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

impl From<CryptFileError> for io::Error {
    fn from(err: CryptFileError) -> Self {
        match err {
            CryptFileError::Io(e) => e,
            CryptFileError::FileNotOpen => Self::new(io::ErrorKind::NotConnected, err),
            CryptFileError::InvalidSeek { .. } => Self::new(io::ErrorKind::InvalidInput, err),
            CryptFileError::InvalidCryptfileFormat(_) | CryptFileError::Format(_) => {
                Self::new(io::ErrorKind::InvalidData, err)
            }
            other => Self::other(other),
        }
    }
}

/// Version information for the container format library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
