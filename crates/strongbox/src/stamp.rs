//! Integrity stamps
//!
//! A stamp is written right after the last chunk and covers every raw byte
//! before it. All operations here work on a closed container: they open the
//! metadata only, do their work and close again on every path.

use strongbox_crypto::{StampHasher, StampKind};
use strongbox_formats::FileStamp;
use strongbox_formats::stamp::STAMP_LENGTH_SIZE;
use tracing::{debug, info};

use crate::backing::BackingFile;
use crate::container::CryptFile;
use crate::mode::OpenMode;
use crate::processor::Processor;
use crate::{CryptFileError, Result};

impl<P: Processor, F: BackingFile> CryptFile<P, F> {
    /// SHA-256 of the raw container bytes.
    pub fn digest(&mut self) -> Result<Vec<u8>> {
        Ok(self.hash_file(StampKind::Digest)?.finalize())
    }

    /// HMAC-SHA256 of the raw container bytes.
    pub fn mac(&mut self) -> Result<Vec<u8>> {
        Ok(self.hash_file(StampKind::Mac)?.finalize())
    }

    /// Compare the digest against `expected`.
    pub fn verify_digest(&mut self, expected: &[u8]) -> Result<()> {
        Ok(self.hash_file(StampKind::Digest)?.verify(expected)?)
    }

    /// Compare the MAC against `expected`.
    pub fn verify_mac(&mut self, expected: &[u8]) -> Result<()> {
        Ok(self.hash_file(StampKind::Mac)?.verify(expected)?)
    }

    /// Store the digest in the stamp, keeping a stored MAC.
    pub fn stamp_digest(&mut self) -> Result<()> {
        self.stamp(StampKind::Digest)
    }

    /// Store the MAC in the stamp, keeping a stored digest.
    pub fn stamp_mac(&mut self) -> Result<()> {
        self.stamp(StampKind::Mac)
    }

    /// Check the file against the stamped digest.
    pub fn check_stamp_digest(&mut self) -> Result<()> {
        self.check_stamp(StampKind::Digest)
    }

    /// Check the file against the stamped MAC.
    pub fn verify_stamp_mac(&mut self) -> Result<()> {
        self.check_stamp(StampKind::Mac)
    }

    fn hash_file(&mut self, kind: StampKind) -> Result<StampHasher> {
        self.open_metadata(OpenMode::Scan)?;
        let result = self.hash_open_file(kind);
        let closed = self.close_metadata();
        let hasher = result?;
        closed?;
        Ok(hasher)
    }

    fn hash_open_file(&mut self, kind: StampKind) -> Result<StampHasher> {
        let mut hasher = self.processor().stamp_hasher(kind)?;
        let end = self.eof_pos();
        let mut block = vec![0u8; self.config().max_processing_size.max(1)];

        let file = self.backing_mut();
        file.seek(0)?;
        let mut pos = 0u64;
        while pos < end {
            let len = usize::try_from(end - pos)
                .unwrap_or(usize::MAX)
                .min(block.len());
            if file.read(&mut block[..len])? != len {
                return Err(CryptFileError::FileReadFailed);
            }
            hasher.update(&block[..len]);
            pos += len as u64;
        }
        debug!("hashed {end} bytes for {kind:?}");
        Ok(hasher)
    }

    /// Stamp stored after the last chunk.
    fn read_stamp(&mut self) -> Result<FileStamp> {
        let start = self.eof_pos();
        let file = self.backing_mut();
        let available = file.size()?.saturating_sub(start);
        if available < STAMP_LENGTH_SIZE as u64 {
            return Err(CryptFileError::FileStampFailed("no stamp".to_string()));
        }

        let mut length = [0u8; STAMP_LENGTH_SIZE];
        file.seek(start)?;
        if file.read(&mut length)? != length.len() {
            return Err(CryptFileError::FileStampFailed("no stamp".to_string()));
        }
        let length = u16::from_le_bytes(length);
        if length == 0 || u64::from(length) > available - STAMP_LENGTH_SIZE as u64 {
            return Err(CryptFileError::FileStampFailed(format!(
                "stamp length {length} with {available} trailing bytes"
            )));
        }

        let mut record = vec![0u8; usize::from(length)];
        if file.read(&mut record)? != record.len() {
            return Err(CryptFileError::FileStampFailed("short stamp".to_string()));
        }
        FileStamp::parse(&record).map_err(|e| CryptFileError::FileStampFailed(e.to_string()))
    }

    fn load_stamp(&mut self) -> Result<FileStamp> {
        self.open_metadata(OpenMode::Read)?;
        let result = self.read_stamp();
        let closed = self.close_metadata();
        let stamp = result?;
        closed?;
        Ok(stamp)
    }

    fn stamp(&mut self, kind: StampKind) -> Result<()> {
        let value = self.hash_file(kind)?.finalize();
        let mut stamp = self.load_stamp().unwrap_or_else(|e| {
            debug!("starting a new stamp: {e}");
            FileStamp::default()
        });
        match kind {
            StampKind::Digest => stamp.set_digest(value)?,
            StampKind::Mac => stamp.set_mac(value)?,
        }
        let framed = stamp.build_framed()?;

        self.open_metadata(OpenMode::WriteExisting)?;
        let result = self.write_stamp(&framed);
        let closed = self.close_metadata();
        result?;
        closed?;
        info!("stamped {} with {kind:?}", self.path().display());
        Ok(())
    }

    fn write_stamp(&mut self, framed: &[u8]) -> Result<()> {
        let start = self.eof_pos();
        let file = self.backing_mut();
        file.seek(start)?;
        if file.write(framed)? != framed.len() {
            return Err(CryptFileError::FileWriteFailed);
        }
        file.truncate(start + framed.len() as u64, false)?;
        file.flush(false)
    }

    fn check_stamp(&mut self, kind: StampKind) -> Result<()> {
        let stamp = self.load_stamp()?;
        let expected = match kind {
            StampKind::Digest => stamp.digest(),
            StampKind::Mac => stamp.mac(),
        }
        .ok_or_else(|| CryptFileError::FileStampFailed(format!("no {kind:?} in stamp")))?
        .to_vec();
        Ok(self.hash_file(kind)?.verify(&expected)?)
    }
}
