//! Bounded LRU pool of decrypted chunks.
//!
//! The container owns its active chunk outside the pool. A chunk enters the
//! pool when the container moves away from it and leaves it again on a hit,
//! so the capacity covers the active chunk as well: at most `capacity - 1`
//! chunks are pooled at any time.
//!
//! Evicted chunks are handed back to the caller, which must flush them if
//! they are dirty.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::chunk::Chunk;

/// LRU chunk cache.
#[derive(Debug)]
pub struct ChunkCache {
    /// Pooled chunks, most recently used at the back.
    entries: Mutex<VecDeque<Chunk>>,
    /// Maximum number of chunks in memory, active chunk included.
    capacity: usize,
}

impl ChunkCache {
    /// Create a cache with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity - 1)),
            capacity,
        }
    }

    /// Maximum number of chunks in memory.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of pooled chunks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Check if a chunk is pooled.
    pub fn contains(&self, seqnum: u32) -> bool {
        self.entries.lock().iter().any(|c| c.seqnum == seqnum)
    }

    /// Remove and return a pooled chunk.
    pub fn take(&self, seqnum: u32) -> Option<Chunk> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|c| c.seqnum == seqnum)?;
        entries.remove(index)
    }

    /// Pool a chunk as most recently used, returning the chunk evicted to
    /// make room for it.
    pub fn insert(&self, chunk: Chunk) -> Option<Chunk> {
        let mut entries = self.entries.lock();
        entries.retain(|c| c.seqnum != chunk.seqnum);
        entries.push_back(chunk);
        if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        }
    }

    /// Change the capacity, returning evicted chunks (least recent first).
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<Chunk> {
        self.capacity = capacity.max(1);
        let mut entries = self.entries.lock();
        let excess = (entries.len() + 1).saturating_sub(self.capacity);
        entries.drain(..excess).collect()
    }

    /// Remove every pooled chunk (least recent first).
    pub fn drain(&self) -> Vec<Chunk> {
        self.entries.lock().drain(..).collect()
    }

    /// Put back chunks returned by [`drain`](Self::drain), preserving order.
    pub fn restore(&self, chunks: Vec<Chunk>) {
        self.entries.lock().extend(chunks);
    }

    /// Drop every pooled chunk.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Sequence numbers from least to most recently used.
    pub fn seqnums(&self) -> Vec<u32> {
        self.entries.lock().iter().map(|c| c.seqnum).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seqnum: u32) -> Chunk {
        Chunk::new(seqnum, 16)
    }

    #[test]
    fn test_capacity_counts_active_chunk() {
        let cache = ChunkCache::new(3);
        assert!(cache.insert(chunk(1)).is_none());
        assert!(cache.insert(chunk(2)).is_none());
        assert_eq!(cache.len(), 2);

        // a third pooled chunk would exceed capacity together with the active one
        let evicted = cache.insert(chunk(3)).map(|c| c.seqnum);
        assert_eq!(evicted, Some(1));
        assert_eq!(cache.seqnums(), vec![2, 3]);
    }

    #[test]
    fn test_take_and_reinsert_is_touch() {
        let cache = ChunkCache::new(4);
        for seqnum in 1..=3 {
            cache.insert(chunk(seqnum));
        }
        let hit = cache.take(1);
        assert!(hit.is_some());
        assert!(!cache.contains(1));
        assert!(cache.take(9).is_none());

        cache.insert(chunk(4));
        if let Some(c) = hit {
            let evicted = cache.insert(c).map(|c| c.seqnum);
            assert_eq!(evicted, Some(2));
        }
        assert_eq!(cache.seqnums(), vec![3, 4, 1]);
    }

    #[test]
    fn test_minimum_capacity_pools_nothing() {
        let cache = ChunkCache::new(0);
        assert_eq!(cache.capacity(), 1);
        let evicted = cache.insert(chunk(5)).map(|c| c.seqnum);
        assert_eq!(evicted, Some(5));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_shrink_capacity() {
        let mut cache = ChunkCache::new(8);
        for seqnum in 0..5 {
            cache.insert(chunk(seqnum));
        }
        let evicted: Vec<u32> = cache.set_capacity(3).iter().map(|c| c.seqnum).collect();
        assert_eq!(evicted, vec![0, 1, 2]);
        assert_eq!(cache.seqnums(), vec![3, 4]);
    }

    #[test]
    fn test_drain_restore() {
        let cache = ChunkCache::new(8);
        for seqnum in 0..3 {
            cache.insert(chunk(seqnum));
        }
        let mut chunks = cache.drain();
        assert!(cache.is_empty());
        chunks[1].dirty = true;
        cache.restore(chunks);
        assert_eq!(cache.seqnums(), vec![0, 1, 2]);
        assert!(cache.take(1).is_some_and(|c| c.dirty));
        cache.clear();
        assert!(cache.is_empty());
    }
}
