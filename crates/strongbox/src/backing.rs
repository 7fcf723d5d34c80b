//! Raw byte access to the on-disk container file
//!
//! [`BackingFile`] is the seam between the container logic and the
//! filesystem. [`PlainFile`] implements it over [`std::fs::File`]; tests and
//! callers may substitute their own implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::trace;

use crate::mode::OpenMode;
use crate::{CryptFileError, Result};

/// Unencrypted file handle used underneath a container.
///
/// `open` only ever receives the random-access modes (`Scan`, `Read`,
/// `Write`, `WriteNew`, `WriteExisting`); append modes are resolved by the
/// container before the call.
pub trait BackingFile {
    /// Open `path`.
    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<()>;

    /// Check if a file is open.
    fn is_open(&self) -> bool;

    /// Close the file. Closing a closed file is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Move to an absolute position.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Read until `buf` is full or the end of the file, returning the count.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf`, returning the count.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Set the file length. `backup_copy` requests the new length be durable.
    fn truncate(&mut self, size: u64, backup_copy: bool) -> Result<()>;

    /// Flush buffered writes, syncing data to disk when `deep` is set.
    fn flush(&mut self, deep: bool) -> Result<()>;

    /// Sync file data.
    fn sync(&mut self) -> Result<()>;

    /// Sync file data and metadata.
    fn fsync(&mut self) -> Result<()>;

    /// Length of the open file.
    fn size(&self) -> Result<u64>;

    /// Length of the file at `path` on disk, open or not.
    fn storage_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }
}

/// [`BackingFile`] over a regular filesystem file.
#[derive(Debug, Default)]
pub struct PlainFile {
    file: Option<File>,
}

impl PlainFile {
    /// Create a closed handle.
    pub const fn new() -> Self {
        Self { file: None }
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(CryptFileError::FileNotOpen)
    }
}

impl BackingFile for PlainFile {
    fn open(&mut self, path: &Path, mode: OpenMode) -> Result<()> {
        if self.file.is_some() {
            return Err(CryptFileError::FileAlreadyOpen);
        }

        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Scan | OpenMode::Read => {
                options.read(true);
            }
            OpenMode::Write => {
                options.read(true).write(true).create(true).truncate(true);
            }
            OpenMode::WriteNew => {
                options.read(true).write(true).create_new(true);
            }
            OpenMode::WriteExisting | OpenMode::Append | OpenMode::AppendExisting => {
                options.read(true).write(true);
            }
        }

        self.file = Some(options.open(path)?);
        trace!("opened {} as {:?}", path.display(), mode);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        self.file()?.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file()?.write_all(buf)?;
        Ok(buf.len())
    }

    fn truncate(&mut self, size: u64, backup_copy: bool) -> Result<()> {
        let file = self.file()?;
        file.set_len(size)?;
        if backup_copy {
            file.sync_data()?;
        }
        Ok(())
    }

    fn flush(&mut self, deep: bool) -> Result<()> {
        let file = self.file()?;
        file.flush()?;
        if deep {
            file.sync_data()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file()?.sync_data()?;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        self.file()?.sync_all()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let file = self.file.as_ref().ok_or(CryptFileError::FileNotOpen)?;
        Ok(file.metadata()?.len())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_closed_file_rejects_io() {
        let mut file = PlainFile::new();
        assert!(!file.is_open());
        assert!(matches!(file.seek(0), Err(CryptFileError::FileNotOpen)));
        assert!(matches!(file.size(), Err(CryptFileError::FileNotOpen)));
        file.close().unwrap();
    }

    #[test]
    fn test_write_read_truncate() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("raw.bin");

        let mut file = PlainFile::new();
        file.open(&path, OpenMode::Write).unwrap();
        assert_eq!(file.write(b"0123456789").unwrap(), 10);
        file.seek(4).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"456789");

        file.truncate(3, true).unwrap();
        assert_eq!(file.size().unwrap(), 3);
        file.close().unwrap();
        assert_eq!(file.storage_size(&path).unwrap(), 3);
    }

    #[test]
    fn test_mode_mapping() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("raw.bin");

        let mut file = PlainFile::new();
        assert!(file.open(&path, OpenMode::WriteExisting).is_err());
        file.open(&path, OpenMode::WriteNew).unwrap();
        file.close().unwrap();
        assert!(file.open(&path, OpenMode::WriteNew).is_err());

        file.open(&path, OpenMode::Read).unwrap();
        assert!(file.write(b"x").is_err());
        assert!(matches!(
            file.open(&path, OpenMode::Read),
            Err(CryptFileError::FileAlreadyOpen)
        ));
    }
}
