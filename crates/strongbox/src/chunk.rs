//! Decrypted chunk held in memory

/// One plaintext chunk plus its ciphertext bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based sequence number
    pub seqnum: u32,
    /// Plaintext
    pub content: Vec<u8>,
    /// Cursor within `content`
    pub offset: usize,
    /// Plaintext capacity, 0 when unbounded
    pub max_size: usize,
    /// Bytes this chunk occupies in the backing file
    pub ciphertext_size: u64,
    /// Modified since the last flush
    pub dirty: bool,
    /// Streaming mode: plaintext bytes already encrypted and written
    pub stream_write_cursor: usize,
}

impl Chunk {
    /// Empty chunk
    pub fn new(seqnum: u32, max_size: usize) -> Self {
        Self {
            seqnum,
            max_size,
            ..Self::default()
        }
    }

    /// Free space after the cursor, `None` for an unbounded chunk
    pub fn available(&self) -> Option<usize> {
        (self.max_size != 0).then(|| self.max_size.saturating_sub(self.offset))
    }

    /// Unread plaintext after the cursor
    pub fn remaining(&self) -> usize {
        self.content.len().saturating_sub(self.offset)
    }

    /// Copy `data` in at the cursor, growing the content as needed.
    ///
    /// Returns how many bytes the content grew by.
    pub fn write_at_cursor(&mut self, data: &[u8]) -> usize {
        let old_len = self.content.len();
        let end = self.offset + data.len();
        if self.content.len() < end {
            self.content.resize(end, 0);
        }
        self.content[self.offset..end].copy_from_slice(data);
        self.offset = end;
        end.saturating_sub(old_len)
    }

    /// Copy out at the cursor, returns bytes copied
    pub fn read_at_cursor(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.remaining());
        buf[..len].copy_from_slice(&self.content[self.offset..self.offset + len]);
        self.offset += len;
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_grows_content() {
        let mut chunk = Chunk::new(0, 16);
        assert_eq!(chunk.write_at_cursor(b"hello"), 5);
        assert_eq!(chunk.available(), Some(11));

        // overwrite inside existing content does not grow
        chunk.offset = 1;
        assert_eq!(chunk.write_at_cursor(b"EL"), 0);
        assert_eq!(chunk.content, b"hELlo");

        // partial overlap grows by the part past the end
        chunk.offset = 4;
        assert_eq!(chunk.write_at_cursor(b"O!!"), 2);
        assert_eq!(chunk.content, b"hELlO!!");
    }

    #[test]
    fn test_read_stops_at_content_end() {
        let mut chunk = Chunk::new(1, 8);
        chunk.content = b"abc".to_vec();
        chunk.offset = 1;
        let mut buf = [0u8; 8];
        assert_eq!(chunk.read_at_cursor(&mut buf), 2);
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(chunk.remaining(), 0);
        assert_eq!(chunk.read_at_cursor(&mut buf), 0);
    }

    #[test]
    fn test_unbounded() {
        let chunk = Chunk::new(0, 0);
        assert_eq!(chunk.available(), None);
    }
}
