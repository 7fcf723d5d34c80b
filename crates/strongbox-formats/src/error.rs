//! Format error types

use thiserror::Error;

/// Errors raised while parsing or building container structures
#[derive(Debug, Error)]
pub enum FormatError {
    /// Header magic is neither the block nor the streaming marker
    #[error("invalid container magic: {0:02X?}")]
    InvalidMagic([u8; 3]),

    /// Header format version is not supported
    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u8),

    /// Descriptor version is not supported
    #[error("unsupported descriptor version: {0}")]
    UnsupportedDescriptorVersion(u8),

    /// Input ended before the structure was complete
    #[error("truncated {what}: need {expected} bytes, got {actual}")]
    Truncated {
        /// Structure being parsed
        what: &'static str,
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Field does not fit its on-disk width
    #[error("{field} too large: {size}")]
    FieldTooLarge {
        /// Field name
        field: &'static str,
        /// Offending size
        size: usize,
    },

    /// Stamp record is inconsistent
    #[error("invalid stamp: {0}")]
    InvalidStamp(String),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;
