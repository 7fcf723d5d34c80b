//! Open modes of a container

/// How a container is opened.
///
/// `Append` and `AppendExisting` are emulated on top of random-access writes
/// because the size fields in the header must stay writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Forward-only read, no chunk cache
    #[default]
    Scan,
    /// Random-access read
    Read,
    /// Create or overwrite, random-access read/write
    Write,
    /// Create, failing if the file exists
    WriteNew,
    /// Open an existing file for random-access read/write
    WriteExisting,
    /// Append, creating the file when missing
    Append,
    /// Append to an existing file
    AppendExisting,
}

impl OpenMode {
    /// Check if this mode allows writes.
    pub const fn is_write(self) -> bool {
        !matches!(self, Self::Scan | Self::Read)
    }

    /// Check if writes may only happen at the end of the file.
    pub const fn is_append(self) -> bool {
        matches!(self, Self::Append | Self::AppendExisting)
    }

    /// Chunk caching only pays off when chunks can be revisited.
    pub const fn allows_cache(self) -> bool {
        !matches!(self, Self::Scan | Self::Append | Self::AppendExisting)
    }

    /// Modes compatible with a forward-only stream cipher.
    pub const fn allows_streaming(self) -> bool {
        matches!(self, Self::Scan | Self::Append | Self::AppendExisting)
    }

    /// Whether opening starts a new file (writing a fresh header).
    pub const fn creates_file(self, exists: bool) -> bool {
        match self {
            Self::Write | Self::WriteNew => true,
            Self::Append => !exists,
            _ => false,
        }
    }

    /// Mode passed to the backing file.
    pub const fn raw_mode(self, exists: bool) -> Self {
        match self {
            Self::Append if exists => Self::WriteExisting,
            Self::Append => Self::Write,
            Self::AppendExisting => Self::WriteExisting,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_resolution() {
        assert_eq!(OpenMode::Append.raw_mode(false), OpenMode::Write);
        assert_eq!(OpenMode::Append.raw_mode(true), OpenMode::WriteExisting);
        assert_eq!(OpenMode::AppendExisting.raw_mode(false), OpenMode::WriteExisting);
        assert_eq!(OpenMode::Read.raw_mode(true), OpenMode::Read);
    }

    #[test]
    fn test_new_file_detection() {
        assert!(OpenMode::Write.creates_file(true));
        assert!(OpenMode::WriteNew.creates_file(false));
        assert!(OpenMode::Append.creates_file(false));
        assert!(!OpenMode::Append.creates_file(true));
        assert!(!OpenMode::AppendExisting.creates_file(false));
        assert!(!OpenMode::WriteExisting.creates_file(false));
    }

    #[test]
    fn test_policies() {
        for mode in [OpenMode::Scan, OpenMode::Append, OpenMode::AppendExisting] {
            assert!(!mode.allows_cache());
            assert!(mode.allows_streaming());
        }
        for mode in [
            OpenMode::Read,
            OpenMode::Write,
            OpenMode::WriteNew,
            OpenMode::WriteExisting,
        ] {
            assert!(mode.allows_cache());
            assert!(!mode.allows_streaming());
        }
        assert!(!OpenMode::Read.is_write());
        assert!(OpenMode::AppendExisting.is_write());
        assert!(OpenMode::Append.is_append());
    }
}
