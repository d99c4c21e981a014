//! The heap context: arena layout, growth, placement, coalescing, and the
//! public allocate/free/resize surface.

use core::cmp;
use core::fmt;
use core::num::NonZeroUsize;

use crate::block::{self, Tag};
use crate::list;
use crate::source::MemorySource;
use crate::{ALIGNMENT, CHUNK_SIZE, MIN_BLOCK, OVERHEAD, WORD};

#[cfg(feature = "counters")]
use crate::counters::Counters;

// Arena layout, offsets in words:
//
//   0: free-list head cell
//   1: prologue header  \  zero-payload allocated block, so coalescing
//   2: prologue footer  /  leftward from the first real block finds a tag
//   3: epilogue header: size 0, allocated; rewritten at the top on growth
//
// The first real block's payload lands at word 4, which is one ALIGNMENT
// unit, and all block sizes are ALIGNMENT multiples, so every payload the
// heap hands out is ALIGNMENT-aligned.

/// Payload offset of the prologue sentinel, the arena's first block.
pub(crate) const PROLOGUE: usize = 2 * WORD;

/// Arena-relative address of an allocated payload.
///
/// Addresses are offsets into the heap's arena, not pointers, so they stay
/// valid when the arena's backing buffer grows or moves. Only [`Heap`] can
/// mint them. Holding one after freeing it is the usual dangling-pointer
/// hazard in offset form: the hot paths do not detect it, only
/// [`Heap::check`] can, after the damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(NonZeroUsize);

impl Address {
    /// The offset of the payload's first byte.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A first-fit, boundary-tagged heap with an explicit free list, over an
/// arena owned by a [`MemorySource`].
///
/// Every block carries its size and allocated flag in a header word and
/// again in a footer word; free blocks additionally link into one unordered
/// doubly linked list. Freeing merges with free physical neighbors
/// immediately, so no two free blocks are ever adjacent.
pub struct Heap<S: MemorySource> {
    source: S,
    #[cfg(feature = "counters")]
    pub(crate) counters: Counters,
}

impl<S: MemorySource> fmt::Debug for Heap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("arena_size", &self.arena_size())
            .field("free_head", &format_args!("{:#x}", list::head(self.bytes())))
            .finish()
    }
}

impl<S: MemorySource> Heap<S> {
    /// Builds a heap over `source`, which must start out empty: writes the
    /// list-head cell and the sentinel blocks, then performs the initial
    /// growth of [`CHUNK_SIZE`] bytes. Returns `None` if the source refuses
    /// either request.
    pub fn new(source: S) -> Option<Self> {
        let mut heap = Heap {
            source,
            #[cfg(feature = "counters")]
            counters: Counters::new(),
        };

        // Head cell, prologue header/footer, epilogue header: four words.
        let base = heap.source.grow_arena(4 * WORD)?;
        debug_assert_eq!(base, 0, "the arena must start out empty");

        list::set_head(heap.bytes_mut(), list::NIL);
        heap.put_tag(block::header_of(PROLOGUE), Tag::new(OVERHEAD, true));
        heap.put_tag(PROLOGUE, Tag::new(OVERHEAD, true));
        heap.put_tag(block::header_of(PROLOGUE + OVERHEAD), Tag::new(0, true));

        heap.grow_words(CHUNK_SIZE / WORD)?;

        log::debug!("new heap: {} byte arena", heap.arena_size());
        heap.debug_check("new");
        Some(heap)
    }

    /// Allocates `size` bytes and returns the payload's address.
    ///
    /// The request is rounded up to a whole number of [`ALIGNMENT`] units
    /// including tag overhead, floored at [`MIN_BLOCK`]; the payload slice
    /// spans the whole rounded capacity. Returns `None` for a zero `size`
    /// or when no free block fits and the arena cannot grow far enough.
    pub fn allocate(&mut self, size: usize) -> Option<Address> {
        if size == 0 {
            return None;
        }
        let size = adjusted_size(size)?;

        let bp = match self.find_fit(size) {
            Some(bp) => bp,
            None => self.grow_words(cmp::max(size, CHUNK_SIZE) / WORD)?,
        };
        self.place(bp, size);

        #[cfg(feature = "counters")]
        {
            let placed = self.block_size(bp);
            self.counters.account_alloc(placed);
        }

        self.debug_check("allocate");
        NonZeroUsize::new(bp).map(Address)
    }

    /// Frees the block at `at`, merging it with any free neighbor.
    ///
    /// `at` must be live, from this heap's [`allocate`](Heap::allocate) or
    /// [`resize`](Heap::resize). Double frees and stale addresses corrupt
    /// the heap model and are not guarded here; that contract is checkable
    /// after the fact via [`check`](Heap::check).
    pub fn free(&mut self, at: Address) {
        let bp = at.get();
        debug_assert!(self.block_allocated(bp), "free target must be allocated");

        let size = self.block_size(bp);
        self.set_block(bp, size, false);
        self.insert_free(bp);
        self.coalesce(bp);

        #[cfg(feature = "counters")]
        self.counters.account_free(size);

        self.debug_check("free");
    }

    /// Resizes the allocation at `at` to `size` bytes by allocating afresh,
    /// copying `min(old payload, size)` bytes, and freeing the old block.
    ///
    /// A `None` address behaves as `allocate(size)`; a zero `size` behaves
    /// as `free`, returning `None`. The operation never fails halfway: if
    /// the fresh allocation fails, the original block is untouched and
    /// still valid.
    pub fn resize(&mut self, at: Option<Address>, size: usize) -> Option<Address> {
        let Some(at) = at else {
            return self.allocate(size);
        };
        if size == 0 {
            self.free(at);
            return None;
        }

        let old_bp = at.get();
        let old_payload = self.block_size(old_bp) - OVERHEAD;
        let new = self.allocate(size)?;

        let keep = cmp::min(old_payload, size);
        self.bytes_mut().copy_within(old_bp..old_bp + keep, new.get());
        self.free(at);
        Some(new)
    }

    /// The payload bytes of the allocated block at `at`: the full rounded
    /// capacity, which may exceed the size originally requested.
    pub fn payload(&self, at: Address) -> &[u8] {
        let bp = at.get();
        debug_assert!(self.block_allocated(bp), "payload of a free block");
        let len = self.block_size(bp) - OVERHEAD;
        &self.bytes()[bp..bp + len]
    }

    /// Writable view of [`payload`](Heap::payload).
    pub fn payload_mut(&mut self, at: Address) -> &mut [u8] {
        let bp = at.get();
        debug_assert!(self.block_allocated(bp), "payload of a free block");
        let len = self.block_size(bp) - OVERHEAD;
        &mut self.bytes_mut()[bp..bp + len]
    }

    /// Current arena size in bytes, metadata included.
    pub fn arena_size(&self) -> usize {
        self.source.arena_size()
    }

    /// The backing memory source.
    pub fn source(&self) -> &S {
        &self.source
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.source.bytes()
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.source.bytes_mut()
    }

    fn tag_at(&self, at: usize) -> Tag {
        block::read_tag(self.bytes(), at)
    }

    fn put_tag(&mut self, at: usize, tag: Tag) {
        block::write_tag(self.bytes_mut(), at, tag);
    }

    pub(crate) fn block_size(&self, bp: usize) -> usize {
        self.tag_at(block::header_of(bp)).size()
    }

    pub(crate) fn block_allocated(&self, bp: usize) -> bool {
        self.tag_at(block::header_of(bp)).is_allocated()
    }

    /// Payload offset of the physically next block.
    fn next_block(&self, bp: usize) -> usize {
        bp + self.block_size(bp)
    }

    /// Payload offset of the physically previous block, via its footer.
    /// The prologue guarantees a valid footer below every real block.
    fn prev_block(&self, bp: usize) -> usize {
        bp - self.tag_at(bp - OVERHEAD).size()
    }

    /// Writes matching header and footer tags for the block at `bp`.
    fn set_block(&mut self, bp: usize, size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);
        self.put_tag(block::header_of(bp), tag);
        self.put_tag(bp + size - OVERHEAD, tag);
    }

    fn insert_free(&mut self, bp: usize) {
        #[cfg(feature = "counters")]
        {
            let size = self.block_size(bp);
            self.counters.account_insert(size);
        }
        list::insert_head(self.bytes_mut(), bp);
    }

    fn remove_free(&mut self, bp: usize) {
        #[cfg(feature = "counters")]
        {
            let size = self.block_size(bp);
            self.counters.account_remove(size);
        }
        list::remove(self.bytes_mut(), bp);
    }

    /// O(list) membership probe for the debug assertions.
    fn is_listed(&self, bp: usize) -> bool {
        let cap = self.arena_size() / MIN_BLOCK + 1;
        list::iter(self.bytes()).take(cap).any(|cur| cur == bp)
    }

    /// Extends the arena by `words` machine words, rounded up to even so
    /// the arena stays a whole number of alignment units, and carves the
    /// new bytes into one free block. Its header lands on the old epilogue
    /// position; a fresh epilogue is written at the new top.
    ///
    /// Returns the new free block, merged with the old top block if that
    /// was free, or `None` if the source refuses.
    fn grow_words(&mut self, words: usize) -> Option<usize> {
        let words = words.checked_add(words & 1)?;
        let delta = words.checked_mul(WORD)?;
        debug_assert!(delta >= MIN_BLOCK);

        let bp = self.source.grow_arena(delta)?;
        self.set_block(bp, delta, false);
        self.put_tag(block::header_of(bp + delta), Tag::new(0, true));

        #[cfg(feature = "counters")]
        self.counters.account_grow(delta);

        self.insert_free(bp);
        Some(self.coalesce(bp))
    }

    /// First-fit scan of the free list.
    fn find_fit(&self, size: usize) -> Option<usize> {
        list::iter(self.bytes()).find(|&bp| self.block_size(bp) >= size)
    }

    /// Marks `size` bytes of the free block at `bp` allocated, splitting
    /// off the tail as a new free block when it can stand alone. A
    /// remainder below [`MIN_BLOCK`] stays attached to the allocation as
    /// internal fragmentation rather than becoming an unusable sliver.
    fn place(&mut self, bp: usize, size: usize) {
        debug_assert!(!self.block_allocated(bp));
        let full = self.block_size(bp);
        let remaining = full - size;

        if remaining < MIN_BLOCK {
            self.remove_free(bp);
            self.set_block(bp, full, true);
        } else {
            self.remove_free(bp);
            self.set_block(bp, size, true);
            self.set_block(bp + size, remaining, false);
            self.insert_free(bp + size);
            // restores no-adjacent-frees without assuming the neighbors
            self.coalesce(bp + size);
        }
    }

    /// Merges the free block at `bp` with whichever physical neighbors are
    /// free and returns the merged block's payload offset.
    ///
    /// Contract: `bp` is already marked free and linked into the free
    /// list. The case analysis keeps exactly one of the merged spans
    /// list-resident, so the result is in the list exactly once.
    fn coalesce(&mut self, bp: usize) -> usize {
        debug_assert!(!self.block_allocated(bp), "coalesce target must be free");
        debug_assert!(self.is_listed(bp), "coalesce target must be list-resident");

        let size = self.block_size(bp);
        let prev_bp = self.prev_block(bp);
        let next_bp = self.next_block(bp);

        match (self.block_allocated(prev_bp), self.block_allocated(next_bp)) {
            (true, true) => bp,
            (true, false) => {
                // absorb the successor
                let grown = size + self.block_size(next_bp);
                self.remove_free(next_bp);
                self.set_block(bp, grown, false);

                #[cfg(feature = "counters")]
                self.counters.account_absorb(grown - size);

                bp
            }
            (false, true) => {
                // the predecessor absorbs this block
                let grown = self.block_size(prev_bp) + size;
                self.remove_free(bp);
                self.set_block(prev_bp, grown, false);

                #[cfg(feature = "counters")]
                self.counters.account_absorb(size);

                prev_bp
            }
            (false, false) => {
                let absorbed = size + self.block_size(next_bp);
                let grown = self.block_size(prev_bp) + absorbed;
                self.remove_free(bp);
                self.remove_free(next_bp);
                self.set_block(prev_bp, grown, false);

                #[cfg(feature = "counters")]
                self.counters.account_absorb(absorbed);

                prev_bp
            }
        }
    }
}

/// Rounds a request up to a whole number of alignment units including tag
/// overhead, floored at [`MIN_BLOCK`]. Overflow is exhaustion, not a panic.
fn adjusted_size(size: usize) -> Option<usize> {
    if size <= ALIGNMENT {
        Some(MIN_BLOCK)
    } else {
        let padded = size.checked_add(OVERHEAD + ALIGNMENT - 1)?;
        Some(ALIGNMENT * (padded / ALIGNMENT))
    }
}
