//! Live heap statistics, compiled in by the `counters` feature.

use crate::heap::Heap;
use crate::source::MemorySource;

/// Running totals maintained by every mutating heap operation.
///
/// All byte figures count whole blocks, tags included, so
/// `4 * WORD + allocated_bytes + free_bytes` always equals the arena size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counters {
    /// Number of live allocations.
    pub allocation_count: usize,
    /// Total number of allocations ever made.
    pub total_allocation_count: u64,

    /// Sum of live allocations' block sizes.
    pub allocated_bytes: usize,
    /// Sum of all allocations' block sizes ever made.
    pub total_allocated_bytes: u64,

    /// Number of blocks on the free list.
    pub free_block_count: usize,
    /// Sum of free blocks' sizes.
    pub free_bytes: usize,

    /// Number of arena growths, the initial one included.
    pub grow_count: u64,
    /// Bytes added to the block area by arena growth.
    pub grown_bytes: u64,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            allocation_count: 0,
            total_allocation_count: 0,
            allocated_bytes: 0,
            total_allocated_bytes: 0,
            free_block_count: 0,
            free_bytes: 0,
            grow_count: 0,
            grown_bytes: 0,
        }
    }

    /// Returns the total number of allocated bytes freed again.
    pub const fn total_freed_bytes(&self) -> u64 {
        self.total_allocated_bytes - self.allocated_bytes as u64
    }

    pub(crate) fn account_insert(&mut self, size: usize) {
        self.free_block_count += 1;
        self.free_bytes += size;
    }
    pub(crate) fn account_remove(&mut self, size: usize) {
        self.free_block_count -= 1;
        self.free_bytes -= size;
    }

    /// A listed free block grew in place by `delta` bytes.
    pub(crate) fn account_absorb(&mut self, delta: usize) {
        self.free_bytes += delta;
    }

    pub(crate) fn account_alloc(&mut self, block_size: usize) {
        self.allocation_count += 1;
        self.allocated_bytes += block_size;

        self.total_allocation_count += 1;
        self.total_allocated_bytes += block_size as u64;
    }

    pub(crate) fn account_free(&mut self, block_size: usize) {
        self.allocation_count -= 1;
        self.allocated_bytes -= block_size;
    }

    pub(crate) fn account_grow(&mut self, delta: usize) {
        self.grow_count += 1;
        self.grown_bytes += delta as u64;
    }
}

impl<S: MemorySource> Heap<S> {
    pub fn counters(&self) -> &Counters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use crate::{BoundedSource, Heap, MemorySource, CHUNK_SIZE, WORD};

    fn arena_accounted_for<S: MemorySource>(heap: &Heap<S>) -> bool {
        let c = heap.counters();
        heap.arena_size() == 4 * WORD + c.allocated_bytes + c.free_bytes
    }

    #[test]
    fn tracks_a_full_lifecycle() {
        let mut heap = Heap::new(BoundedSource::new()).unwrap();

        let c = heap.counters();
        assert!(c.allocation_count == 0);
        assert!(c.total_allocation_count == 0);
        assert!(c.allocated_bytes == 0);
        assert!(c.free_block_count == 1);
        assert!(c.free_bytes == CHUNK_SIZE);
        assert!(c.grow_count == 1);
        assert!(c.grown_bytes == CHUNK_SIZE as u64);
        assert!(arena_accounted_for(&heap));

        let a = heap.allocate(100).unwrap();
        let placed = heap.block_size(a.get());
        dbg!(placed);
        let c = heap.counters();
        assert!(c.allocation_count == 1);
        assert!(c.total_allocation_count == 1);
        assert!(c.allocated_bytes == placed);
        assert!(c.total_allocated_bytes == placed as u64);
        assert!(c.free_block_count == 1);
        assert!(arena_accounted_for(&heap));

        // too big for the remainder: forces a growth
        let b = heap.allocate(2 * CHUNK_SIZE).unwrap();
        let c = heap.counters();
        assert!(c.allocation_count == 2);
        assert!(c.grow_count == 2);
        assert!(c.grown_bytes >= (3 * CHUNK_SIZE) as u64);
        assert!(arena_accounted_for(&heap));

        heap.free(a);
        let c = heap.counters();
        assert!(c.allocation_count == 1);
        assert!(c.total_allocation_count == 2);
        assert!(c.allocated_bytes == heap.block_size(b.get()));
        assert!(c.total_freed_bytes() == placed as u64);
        assert!(arena_accounted_for(&heap));

        heap.free(b);
        let c = heap.counters();
        assert!(c.allocation_count == 0);
        assert!(c.allocated_bytes == 0);
        assert!(c.free_block_count == 1);
        assert!(c.free_bytes == heap.arena_size() - 4 * WORD);
        assert!(arena_accounted_for(&heap));
    }

    #[test]
    fn resize_keeps_the_books_balanced() {
        let mut heap = Heap::new(BoundedSource::new()).unwrap();

        let a = heap.allocate(64).unwrap();
        let a = heap.resize(Some(a), 600).unwrap();
        let c = heap.counters();
        assert!(c.allocation_count == 1);
        assert!(c.total_allocation_count == 2);
        assert!(c.allocated_bytes == heap.block_size(a.get()));
        assert!(arena_accounted_for(&heap));

        heap.free(a);
        assert!(heap.counters().allocated_bytes == 0);
        assert!(arena_accounted_for(&heap));
    }
}
