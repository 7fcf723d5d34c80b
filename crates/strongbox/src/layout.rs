//! Mapping between plaintext positions, chunk sequence numbers and raw offsets
//!
//! Chunk 0 may have a different capacity than every later chunk, so all
//! conversions special-case sequence number 0.

use crate::processor::Processor;

/// Chunk geometry of one open container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkLayout {
    data_offset: u64,
    first_chunk_max_size: u64,
    chunk_max_size: u64,
    first_plain: u64,
    plain: u64,
    first_packed: u64,
    packed: u64,
}

impl ChunkLayout {
    /// Geometry from raw size policy and a fixed per-chunk overhead
    pub fn new(first_chunk_max_size: u32, chunk_max_size: u32, overhead: u64, data_offset: u64) -> Self {
        let first = u64::from(first_chunk_max_size);
        let chunk = u64::from(chunk_max_size);
        let first_plain = if first == 0 { chunk } else { first };
        let packed_size = |plain: u64| if plain == 0 { 0 } else { plain + overhead };
        Self {
            data_offset,
            first_chunk_max_size: first,
            chunk_max_size: chunk,
            first_plain,
            plain: chunk,
            first_packed: packed_size(first_plain),
            packed: packed_size(chunk),
        }
    }

    /// Geometry as reported by a processor
    pub fn from_processor<P: Processor + ?Sized>(processor: &P, data_offset: u64) -> Self {
        Self {
            data_offset,
            first_chunk_max_size: u64::from(processor.first_chunk_max_size()),
            chunk_max_size: u64::from(processor.chunk_max_size()),
            first_plain: u64::from(processor.max_plain_chunk_size(0)),
            plain: u64::from(processor.max_plain_chunk_size(1)),
            first_packed: processor.max_packed_chunk_size(0, 0),
            packed: processor.max_packed_chunk_size(1, 0),
        }
    }

    /// Raw offset of chunk 0
    pub const fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Sequence number of the chunk holding `pos`, or `None` when the
    /// position lies beyond the last addressable chunk.
    pub fn pos_to_seqnum(&self, pos: u64) -> Option<u32> {
        let chunk = self.chunk_max_size;
        let first = if self.first_chunk_max_size == 0 {
            chunk
        } else {
            self.first_chunk_max_size
        };

        if first == 0 || pos < first {
            return Some(0);
        }
        if chunk == 0 {
            return Some(1);
        }
        u32::try_from((pos - first) / chunk).ok()?.checked_add(1)
    }

    /// Plaintext position where chunk `seqnum` begins
    pub fn seqnum_to_pos(&self, seqnum: u32) -> u64 {
        if seqnum == 0 {
            return 0;
        }
        self.first_plain + u64::from(seqnum - 1) * self.plain
    }

    /// Raw file offset where chunk `seqnum` begins
    pub fn seqnum_to_raw_pos(&self, seqnum: u32) -> u64 {
        if seqnum == 0 {
            return self.data_offset;
        }
        self.data_offset + self.first_packed + u64::from(seqnum - 1) * self.packed
    }

    /// Offset of `pos` inside its chunk
    pub fn chunk_offset_for_pos(&self, pos: u64) -> Option<u64> {
        Some(pos - self.seqnum_to_pos(self.pos_to_seqnum(pos)?))
    }

    /// Raw bytes taken by the full chunks in front of chunk `seqnum`
    pub fn packed_before(&self, seqnum: u32) -> Option<u64> {
        if seqnum == 0 {
            return Some(0);
        }
        u64::from(seqnum - 1)
            .checked_mul(self.packed)?
            .checked_add(self.first_packed)
    }

    /// Plaintext length of a streaming container with `ciphertext_size`
    /// bytes of chunk data, each chunk starting with `prefix` bytes.
    pub fn streamed_plaintext_size(&self, ciphertext_size: u64, prefix: u64) -> u64 {
        if ciphertext_size == 0 {
            return 0;
        }
        if self.first_plain == 0 || ciphertext_size <= self.first_packed {
            return ciphertext_size.saturating_sub(prefix);
        }

        let rest = ciphertext_size - self.first_packed;
        if self.plain == 0 {
            return self.first_plain + rest.saturating_sub(prefix);
        }
        let full_chunks = rest / self.packed;
        let partial = rest % self.packed;
        self.first_plain + full_chunks * self.plain + partial.saturating_sub(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout() -> ChunkLayout {
        // first chunk 64 bytes, others 32, 28 bytes AEAD overhead, 40 bytes of metadata
        ChunkLayout::new(64, 32, 28, 40)
    }

    #[test]
    fn test_asymmetric_first_chunk() {
        let l = layout();
        assert_eq!(l.pos_to_seqnum(0), Some(0));
        assert_eq!(l.pos_to_seqnum(63), Some(0));
        assert_eq!(l.pos_to_seqnum(64), Some(1));
        assert_eq!(l.pos_to_seqnum(95), Some(1));
        assert_eq!(l.pos_to_seqnum(96), Some(2));
        assert_eq!(l.seqnum_to_pos(1), 64);
        assert_eq!(l.seqnum_to_pos(3), 128);
        assert_eq!(l.chunk_offset_for_pos(100), Some(4));
    }

    #[test]
    fn test_raw_positions() {
        let l = layout();
        assert_eq!(l.seqnum_to_raw_pos(0), 40);
        assert_eq!(l.seqnum_to_raw_pos(1), 40 + 92);
        assert_eq!(l.seqnum_to_raw_pos(2), 40 + 92 + 60);
    }

    #[test]
    fn test_uniform_chunks() {
        let l = ChunkLayout::new(0, 32, 28, 0);
        assert_eq!(l.pos_to_seqnum(31), Some(0));
        assert_eq!(l.pos_to_seqnum(32), Some(1));
        assert_eq!(l.seqnum_to_pos(2), 64);
        assert_eq!(l.seqnum_to_raw_pos(2), 120);
    }

    #[test]
    fn test_unbounded_chunk() {
        let l = ChunkLayout::new(0, 0, 8, 30);
        assert_eq!(l.pos_to_seqnum(0), Some(0));
        assert_eq!(l.pos_to_seqnum(u64::from(u32::MAX) * 4), Some(0));
        assert_eq!(l.chunk_offset_for_pos(12345), Some(12345));
        assert_eq!(l.streamed_plaintext_size(108, 8), 100);
    }

    #[test]
    fn test_bounded_first_unbounded_rest() {
        let l = ChunkLayout::new(16, 0, 8, 0);
        assert_eq!(l.pos_to_seqnum(15), Some(0));
        assert_eq!(l.pos_to_seqnum(16), Some(1));
        assert_eq!(l.pos_to_seqnum(10_000), Some(1));
        assert_eq!(l.seqnum_to_raw_pos(1), 24);
        assert_eq!(l.streamed_plaintext_size(24 + 8 + 5, 8), 21);
    }

    #[test]
    fn test_seqnum_overflow() {
        let l = ChunkLayout::new(0, 1, 28, 0);
        assert_eq!(l.pos_to_seqnum(u64::from(u32::MAX) - 1), Some(u32::MAX - 1));
        assert_eq!(l.pos_to_seqnum(u64::from(u32::MAX)), Some(u32::MAX));
        assert_eq!(l.pos_to_seqnum(1 << 32), None);
        assert_eq!(l.chunk_offset_for_pos(u64::MAX), None);
        assert_eq!(l.packed_before(3), Some(87));
        assert_eq!(ChunkLayout::new(0, u32::MAX, 28, 0).packed_before(u32::MAX), None);
    }

    #[test]
    fn test_streamed_size() {
        let l = ChunkLayout::new(64, 32, 8, 0);
        assert_eq!(l.streamed_plaintext_size(0, 8), 0);
        assert_eq!(l.streamed_plaintext_size(8 + 10, 8), 10);
        assert_eq!(l.streamed_plaintext_size(72, 8), 64);
        assert_eq!(l.streamed_plaintext_size(72 + 40, 8), 96);
        assert_eq!(l.streamed_plaintext_size(72 + 40 + 8 + 1, 8), 97);
    }

    proptest! {
        #[test]
        fn seqnum_covers_position(pos in 0u64..1_000_000, first in 0u32..500, chunk in 1u32..500) {
            let l = ChunkLayout::new(first, chunk, 28, 0);
            let seqnum = l.pos_to_seqnum(pos).unwrap();
            let start = l.seqnum_to_pos(seqnum);
            let capacity = if seqnum == 0 && first != 0 { u64::from(first) } else { u64::from(chunk) };
            prop_assert!(start <= pos);
            prop_assert!(pos < start + capacity);
            prop_assert_eq!(l.chunk_offset_for_pos(pos), Some(pos - start));
        }

        #[test]
        fn streamed_size_inverts_layout(size in 0u64..100_000, first in 0u32..300, chunk in 1u32..300) {
            let l = ChunkLayout::new(first, chunk, 8, 0);
            // ciphertext of a streaming file holding `size` bytes, every touched chunk carries a prefix
            let ciphertext = if size == 0 {
                0
            } else {
                let last = l.pos_to_seqnum(size - 1).unwrap();
                l.seqnum_to_raw_pos(last) + 8 + (size - l.seqnum_to_pos(last))
            };
            prop_assert_eq!(l.streamed_plaintext_size(ciphertext, 8), size);
        }
    }
}
