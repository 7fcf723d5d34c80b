//! Integrity stamp record
//!
//! A stamp follows the last chunk of a container as
//! `u16 LE length || record`. The record carries an optional digest and an
//! optional MAC over the raw container bytes preceding it.

use std::io::Cursor;

use binrw::{BinRead, BinWrite};

use crate::error::{FormatError, FormatResult};

/// Size of the length prefix in front of a stamp record
pub const STAMP_LENGTH_SIZE: usize = 2;

/// Flag bit: digest present
pub const FLAG_DIGEST: u8 = 0x01;

/// Flag bit: MAC present
pub const FLAG_MAC: u8 = 0x02;

/// Serialized stamp record
#[derive(Debug, Clone, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct FileStamp {
    /// Presence flags
    pub flags: u8,

    /// Digest length
    pub digest_len: u8,

    /// Digest bytes
    #[br(count = digest_len)]
    pub digest: Vec<u8>,

    /// MAC length
    pub mac_len: u8,

    /// MAC bytes
    #[br(count = mac_len)]
    pub mac: Vec<u8>,
}

impl FileStamp {
    /// Stored digest, if any
    pub fn digest(&self) -> Option<&[u8]> {
        (self.flags & FLAG_DIGEST != 0).then_some(self.digest.as_slice())
    }

    /// Stored MAC, if any
    pub fn mac(&self) -> Option<&[u8]> {
        (self.flags & FLAG_MAC != 0).then_some(self.mac.as_slice())
    }

    /// Replace the digest
    pub fn set_digest(&mut self, digest: Vec<u8>) -> FormatResult<()> {
        self.digest_len = field_len("digest", &digest)?;
        self.digest = digest;
        self.flags |= FLAG_DIGEST;
        Ok(())
    }

    /// Replace the MAC
    pub fn set_mac(&mut self, mac: Vec<u8>) -> FormatResult<()> {
        self.mac_len = field_len("mac", &mac)?;
        self.mac = mac;
        self.flags |= FLAG_MAC;
        Ok(())
    }

    /// Parse a record (without its length prefix)
    pub fn parse(data: &[u8]) -> FormatResult<Self> {
        let mut cursor = Cursor::new(data);
        let stamp = Self::read_le(&mut cursor)?;
        if cursor.position() != data.len() as u64 {
            return Err(FormatError::InvalidStamp(format!(
                "{} trailing bytes",
                data.len() as u64 - cursor.position()
            )));
        }
        if stamp.flags & !(FLAG_DIGEST | FLAG_MAC) != 0 {
            return Err(FormatError::InvalidStamp(format!(
                "unknown flags 0x{:02X}",
                stamp.flags
            )));
        }
        if stamp.digest().is_some_and(<[u8]>::is_empty) || stamp.mac().is_some_and(<[u8]>::is_empty)
        {
            return Err(FormatError::InvalidStamp("empty field".to_string()));
        }
        Ok(stamp)
    }

    /// Serialize the record (without its length prefix)
    pub fn build(&self) -> FormatResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_le(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Serialize with the `u16` length prefix
    pub fn build_framed(&self) -> FormatResult<Vec<u8>> {
        let record = self.build()?;
        let len = u16::try_from(record.len()).map_err(|_| FormatError::FieldTooLarge {
            field: "stamp",
            size: record.len(),
        })?;
        let mut framed = Vec::with_capacity(STAMP_LENGTH_SIZE + record.len());
        framed.extend_from_slice(&len.to_le_bytes());
        framed.extend_from_slice(&record);
        Ok(framed)
    }
}

fn field_len(field: &'static str, data: &[u8]) -> FormatResult<u8> {
    u8::try_from(data.len()).map_err(|_| FormatError::FieldTooLarge {
        field,
        size: data.len(),
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_stamp() {
        let stamp = FileStamp::default();
        assert!(stamp.digest().is_none());
        assert!(stamp.mac().is_none());
        assert_eq!(stamp.build().unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_fields_are_independent() {
        let mut stamp = FileStamp::default();
        stamp.set_digest(vec![1; 32]).unwrap();
        stamp.set_mac(vec![2; 32]).unwrap();

        let framed = stamp.build_framed().unwrap();
        assert_eq!(&framed[..2], &(3u16 + 64).to_le_bytes());

        let parsed = FileStamp::parse(&framed[2..]).unwrap();
        assert_eq!(parsed.digest(), Some(&[1u8; 32][..]));
        assert_eq!(parsed.mac(), Some(&[2u8; 32][..]));
    }

    #[test]
    fn test_replace_keeps_other_field() {
        let mut stamp = FileStamp::default();
        stamp.set_mac(vec![9; 32]).unwrap();
        stamp.set_digest(vec![1; 4]).unwrap();
        stamp.set_digest(vec![2; 32]).unwrap();
        assert_eq!(stamp.digest(), Some(&[2u8; 32][..]));
        assert_eq!(stamp.mac(), Some(&[9u8; 32][..]));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(FileStamp::parse(&[0x01, 0x00, 0x00]).is_err());
        assert!(FileStamp::parse(&[0x00, 0x00, 0x00, 0xFF]).is_err());
        assert!(FileStamp::parse(&[0x80, 0x00, 0x00]).is_err());
        assert!(FileStamp::parse(&[0x01, 0x05, 0x00]).is_err());
    }

    #[test]
    fn test_field_too_large() {
        let mut stamp = FileStamp::default();
        assert!(stamp.set_digest(vec![0; 256]).is_err());
    }
}
