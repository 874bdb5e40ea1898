//! Reusable read buffers.
//!
//! A [`BufferPool`] belongs to exactly one reader loop (one unpack/pack worker, one loader). It keeps one buffer
//! per power-of-two size class, so a sequence of reads of similar sizes stops allocating after the first few
//! files. Dropping the pool releases everything it retained.

use std::collections::BTreeMap;

/// Smallest size class handed out, in bytes
const MIN_CLASS: usize = 4;

/// Size-indexed scratch buffers for sequential reads
#[derive(Debug, Default)]
pub struct BufferPool {
    classes: BTreeMap<usize, Vec<u8>>,
}

impl BufferPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Size class serving a request of `size` bytes
    pub fn class_for(size: usize) -> usize {
        size.max(MIN_CLASS).next_power_of_two()
    }

    /// Borrow a buffer of exactly `size` bytes.
    ///
    /// The content is whatever the previous user of the same size class left behind.
    pub fn buffer(&mut self, size: usize) -> &mut [u8] {
        let class = Self::class_for(size);
        let buffer = self.classes.entry(class).or_default();
        if buffer.len() < class {
            buffer.resize(class, 0);
        }
        &mut buffer[..size]
    }

    /// Number of size classes currently retained
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the pool retains no buffers
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Total bytes held by the pool
    pub fn retained_bytes(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    /// Release every retained buffer
    pub fn clear(&mut self) {
        self.classes.clear();
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::buffers::BufferPool;

    #[test]
    fn size_classes_round_up() {
        assert_eq!(BufferPool::class_for(0), 4);
        assert_eq!(BufferPool::class_for(4), 4);
        assert_eq!(BufferPool::class_for(5), 8);
        assert_eq!(BufferPool::class_for(1000), 1024);
    }

    #[test]
    fn buffers_are_reused_within_a_class() {
        let mut pool = BufferPool::new();

        pool.buffer(600).fill(0xAB);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.retained_bytes(), 1024);

        let again = pool.buffer(700);
        assert_eq!(again.len(), 700);
        assert_eq!(again[0], 0xAB);
        assert_eq!(pool.len(), 1);

        pool.buffer(4);
        assert_eq!(pool.len(), 2);

        pool.clear();
        assert!(pool.is_empty());
    }
}
