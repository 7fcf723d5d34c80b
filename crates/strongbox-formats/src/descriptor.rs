//! Container descriptor
//!
//! Stored directly after the header. Holds everything besides the master key
//! that a reader needs: key derivation parameters, the cipher suite and the
//! chunk size policy.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use crate::error::{FormatError, FormatResult};

/// Current descriptor version
pub const DESCRIPTOR_VERSION: u8 = 1;

/// Size of the fixed part preceding the salt
pub const DESCRIPTOR_FIXED_SIZE: usize = 16;

/// Key derivation and chunking parameters of one container
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct ContainerDescriptor {
    /// Descriptor version
    pub version: u8,

    /// Key derivation function identifier
    pub kdf_type: u8,

    /// Cipher suite identifier
    pub cipher_suite: u8,

    /// PBKDF2 iterations (ignored by plain HKDF)
    pub kdf_rounds: u32,

    /// Maximum plaintext size of chunk 0 (0 = same as other chunks)
    pub first_chunk_max_size: u32,

    /// Maximum plaintext size of chunks after the first (0 = unbounded)
    pub chunk_max_size: u32,

    /// Salt length
    pub salt_len: u8,

    /// Key derivation salt
    #[br(count = salt_len)]
    pub salt: Vec<u8>,
}

impl ContainerDescriptor {
    /// Create a descriptor
    pub fn new(
        kdf_type: u8,
        cipher_suite: u8,
        kdf_rounds: u32,
        first_chunk_max_size: u32,
        chunk_max_size: u32,
        salt: Vec<u8>,
    ) -> FormatResult<Self> {
        let salt_len = u8::try_from(salt.len()).map_err(|_| FormatError::FieldTooLarge {
            field: "salt",
            size: salt.len(),
        })?;
        Ok(Self {
            version: DESCRIPTOR_VERSION,
            kdf_type,
            cipher_suite,
            kdf_rounds,
            first_chunk_max_size,
            chunk_max_size,
            salt_len,
            salt,
        })
    }

    /// Serialized size
    pub fn encoded_size(&self) -> usize {
        DESCRIPTOR_FIXED_SIZE + self.salt.len()
    }

    /// Parse a descriptor occupying all of `data`
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        if data.len() < DESCRIPTOR_FIXED_SIZE {
            return Err(FormatError::Truncated {
                what: "descriptor",
                expected: DESCRIPTOR_FIXED_SIZE,
                actual: data.len(),
            });
        }
        if data[0] != DESCRIPTOR_VERSION {
            return Err(FormatError::UnsupportedDescriptorVersion(data[0]));
        }

        let descriptor = Self::read_le(&mut Cursor::new(data))?;
        if descriptor.encoded_size() != data.len() {
            return Err(FormatError::Truncated {
                what: "descriptor",
                expected: descriptor.encoded_size(),
                actual: data.len(),
            });
        }
        Ok(descriptor)
    }

    /// Serialize
    pub fn build(&self) -> FormatResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(self.encoded_size()));
        self.write_le(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}
