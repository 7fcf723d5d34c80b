//! Fixed-size container header
//!
//! ```text
//! 0..3   magic "SBC" (block) or "SBS" (streaming)
//! 3      format version
//! 4..6   descriptor size (u16 LE)
//! 6..14  plaintext size (u64 LE)
//! 14..22 ciphertext size (u64 LE)
//! ```
//!
//! Both size fields can be overwritten in place without rewriting the rest of
//! the header.

use std::io::Cursor;

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite};

use crate::error::{FormatError, FormatResult};

/// Magic of a block-mode container
pub const BLOCK_MAGIC: [u8; 3] = *b"SBC";

/// Magic of a streaming container
pub const STREAM_MAGIC: [u8; 3] = *b"SBS";

/// Current header format version
pub const FORMAT_VERSION: u8 = 1;

/// Serialized header size
pub const HEADER_SIZE: usize = 22;

/// Offset of the descriptor size field
pub const DESCRIPTOR_SIZE_OFFSET: u64 = 4;

/// Offset of the plaintext size field
pub const PLAINTEXT_SIZE_OFFSET: u64 = 6;

/// Offset of the ciphertext size field
pub const CIPHERTEXT_SIZE_OFFSET: u64 = 14;

/// Container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Streaming container marker
    pub streaming: bool,
    /// Format version
    pub version: u8,
    /// Size of the descriptor following the header
    pub descriptor_size: u16,
    /// Logical plaintext length
    pub plaintext_size: u64,
    /// Bytes occupied by chunk ciphertext
    pub ciphertext_size: u64,
}

fn check_magic(magic: [u8; 3]) -> FormatResult<bool> {
    match magic {
        BLOCK_MAGIC => Ok(false),
        STREAM_MAGIC => Ok(true),
        other => Err(FormatError::InvalidMagic(other)),
    }
}

impl BinRead for ContainerHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;

        let mut magic = [0u8; 3];
        reader.read_exact(&mut magic)?;
        let streaming = check_magic(magic).map_err(|e| binrw::Error::Custom {
            pos,
            err: Box::new(e),
        })?;

        let version = u8::read_options(reader, binrw::Endian::Little, ())?;
        if version != FORMAT_VERSION {
            return Err(binrw::Error::Custom {
                pos: pos + 3,
                err: Box::new(FormatError::UnsupportedVersion(version)),
            });
        }

        let descriptor_size = u16::read_options(reader, binrw::Endian::Little, ())?;
        let plaintext_size = u64::read_options(reader, binrw::Endian::Little, ())?;
        let ciphertext_size = u64::read_options(reader, binrw::Endian::Little, ())?;

        Ok(Self {
            streaming,
            version,
            descriptor_size,
            plaintext_size,
            ciphertext_size,
        })
    }
}

impl BinWrite for ContainerHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let magic = if self.streaming {
            STREAM_MAGIC
        } else {
            BLOCK_MAGIC
        };
        writer.write_all(&magic)?;
        self.version
            .write_options(writer, binrw::Endian::Little, ())?;
        self.descriptor_size
            .write_options(writer, binrw::Endian::Little, ())?;
        self.plaintext_size
            .write_options(writer, binrw::Endian::Little, ())?;
        self.ciphertext_size
            .write_options(writer, binrw::Endian::Little, ())?;
        Ok(())
    }
}

impl ContainerHeader {
    /// Header for a freshly created container
    pub fn new(streaming: bool, descriptor_size: u16, plaintext_size: u64) -> Self {
        Self {
            streaming,
            version: FORMAT_VERSION,
            descriptor_size,
            plaintext_size,
            ciphertext_size: 0,
        }
    }

    /// Parse from the first [`HEADER_SIZE`] bytes of `data`
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                what: "header",
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        // report magic and version problems as typed errors
        let mut magic = [0u8; 3];
        magic.copy_from_slice(&data[..3]);
        check_magic(magic)?;
        if data[3] != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(data[3]));
        }

        Ok(Self::read_le(&mut Cursor::new(&data[..HEADER_SIZE]))?)
    }

    /// Serialize to exactly [`HEADER_SIZE`] bytes
    pub fn build(&self) -> FormatResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(HEADER_SIZE));
        self.write_le(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_layout() {
        let header = ContainerHeader {
            streaming: false,
            version: FORMAT_VERSION,
            descriptor_size: 0x1234,
            plaintext_size: 0x0102_0304_0506_0708,
            ciphertext_size: 0x1112_1314_1516_1718,
        };
        let bytes = header.build().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..3], b"SBC");
        assert_eq!(bytes[3], 1);
        assert_eq!(&bytes[4..6], &[0x34, 0x12]);
        let plain = PLAINTEXT_SIZE_OFFSET as usize;
        let cipher = CIPHERTEXT_SIZE_OFFSET as usize;
        assert_eq!(&bytes[plain..plain + 8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[cipher..cipher + 8], &0x1112_1314_1516_1718u64.to_le_bytes());
        assert_eq!(ContainerHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_streaming_magic() {
        let header = ContainerHeader::new(true, 40, 0);
        let bytes = header.build().unwrap();
        assert_eq!(&bytes[..3], b"SBS");
        assert!(ContainerHeader::parse(&bytes).unwrap().streaming);
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            ContainerHeader::parse(&[0u8; 10]),
            Err(FormatError::Truncated {
                what: "header",
                expected: HEADER_SIZE,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = ContainerHeader::new(false, 1, 2).build().unwrap();
        bytes[3] = 9;
        assert!(matches!(
            ContainerHeader::parse(&bytes),
            Err(FormatError::UnsupportedVersion(9))
        ));
        bytes[0] = b'X';
        assert!(matches!(
            ContainerHeader::parse(&bytes),
            Err(FormatError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_binread_rejects_magic() {
        let mut bytes = ContainerHeader::new(false, 1, 2).build().unwrap();
        bytes[1] = b'Z';
        let result = ContainerHeader::read_le(&mut Cursor::new(&bytes));
        assert!(matches!(result, Err(binrw::Error::Custom { pos: 0, .. })));
    }
}
