//! Heap diagnostics: the address-order walk and the consistency checker.
//!
//! Nothing here runs on the allocation paths in release builds. The
//! checker is deliberately paranoid: it re-derives every structural
//! invariant from the raw bytes, bounds-checks every step, and reports the
//! first violation instead of panicking, so it can be pointed at a heap
//! suspected to be damaged.

use core::fmt;

use thiserror::Error;

use crate::block::{self, Tag};
use crate::heap::{Heap, PROLOGUE};
use crate::list;
use crate::source::MemorySource;
use crate::{ALIGNMENT, OVERHEAD, WORD};

/// One block reported by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload offset.
    pub addr: usize,
    /// Whole-block size in bytes, tags included.
    pub size: usize,
    /// Allocated flag.
    pub allocated: bool,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = if self.allocated { 'a' } else { 'f' };
        write!(f, "{:#x}: [{}:{}]", self.addr, self.size, flag)
    }
}

/// Address-order iterator over a heap's blocks. See [`Heap::blocks`].
#[derive(Debug, Clone, Copy)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Blocks<'a> {
    bytes: &'a [u8],
    header: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let end = self.header.checked_add(WORD)?;
        if end > self.bytes.len() {
            return None;
        }
        let tag = block::read_tag(self.bytes, self.header);
        if tag.size() == 0 {
            // epilogue
            return None;
        }

        let info = BlockInfo {
            addr: block::payload_of(self.header),
            size: tag.size(),
            allocated: tag.is_allocated(),
        };
        self.header = self.header.checked_add(tag.size()).unwrap_or(usize::MAX);
        Some(info)
    }
}

/// A structural violation found by [`Heap::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Violation {
    /// The prologue's tags are not an allocated minimal block.
    #[error("prologue tags are damaged")]
    BadPrologue,
    /// The arena does not end in an allocated zero-size epilogue header.
    #[error("epilogue header is damaged")]
    BadEpilogue,
    /// A block's payload offset is not a multiple of the alignment unit.
    #[error("block at {at:#x} is misaligned")]
    Misaligned {
        /// Payload offset of the offending block.
        at: usize,
    },
    /// A block's header and footer disagree.
    #[error("header and footer disagree at {at:#x}")]
    TagMismatch {
        /// Payload offset of the offending block.
        at: usize,
    },
    /// A block's recorded extent does not fit the arena.
    #[error("block at {at:#x} runs outside the arena")]
    OutOfBounds {
        /// Payload offset of the offending block.
        at: usize,
    },
    /// Two physically adjacent blocks are both free.
    #[error("adjacent free blocks at {at:#x}")]
    AdjacentFree {
        /// Payload offset of the second of the two.
        at: usize,
    },
    /// A free-list entry is not marked free.
    #[error("allocated block at {at:#x} is linked into the free list")]
    AllocatedInList {
        /// Payload offset of the offending entry.
        at: usize,
    },
    /// A free-list entry's backlink does not match its list position.
    #[error("free-list linkage broken at {at:#x}")]
    BrokenLink {
        /// Payload offset of the offending entry.
        at: usize,
    },
    /// The free list and the heap walk disagree on the free blocks.
    #[error("free list holds {listed} blocks but the walk found {walked}")]
    FreeCountMismatch {
        /// Free blocks seen by the address-order walk.
        walked: usize,
        /// Entries reached through the free list.
        listed: usize,
    },
}

/// A failed [`Heap::check`]: the first violation found, tagged with the
/// caller-supplied context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("heap check failed ({context}): {violation}")]
pub struct CheckFailed {
    /// Caller-supplied tag identifying the call site.
    pub context: &'static str,
    /// What the checker found.
    pub violation: Violation,
}

impl<S: MemorySource> Heap<S> {
    /// Walks the heap in address order, from the prologue up to (not
    /// including) the epilogue header.
    ///
    /// The walk trusts the tags it reads; on a damaged heap it ends early
    /// rather than stepping outside the arena. [`check`](Heap::check) is
    /// the validating counterpart.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks { bytes: self.bytes(), header: block::header_of(PROLOGUE) }
    }

    /// Validates the whole heap: sentinel shape, per-block alignment,
    /// header/footer agreement, block bounds, exhaustive coalescing, and
    /// free-list soundness against the walk.
    ///
    /// Returns the first violation found, tagged with `context` so call
    /// sites can be told apart in test failures and logs.
    pub fn check(&self, context: &'static str) -> Result<(), CheckFailed> {
        match self.find_violation() {
            None => Ok(()),
            Some(violation) => {
                log::debug!("heap check failed ({context}): {violation}");
                Err(CheckFailed { context, violation })
            }
        }
    }

    /// Full check on every mutating operation's way out; debug builds only.
    #[cfg(debug_assertions)]
    pub(crate) fn debug_check(&self, context: &'static str) {
        if let Err(failed) = self.check(context) {
            panic!("{failed}");
        }
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn debug_check(&self, _context: &'static str) {}

    fn find_violation(&self) -> Option<Violation> {
        let bytes = self.bytes();
        let end = bytes.len();

        // sentinels first: the walk below keys off them
        if end < 4 * WORD {
            return Some(Violation::BadPrologue);
        }
        let prologue = Tag::new(OVERHEAD, true);
        if block::read_tag(bytes, block::header_of(PROLOGUE)) != prologue
            || block::read_tag(bytes, PROLOGUE) != prologue
        {
            return Some(Violation::BadPrologue);
        }

        let epilogue_at = end - WORD;
        let epilogue = block::read_tag(bytes, epilogue_at);
        if epilogue.size() != 0 || !epilogue.is_allocated() {
            return Some(Violation::BadEpilogue);
        }

        // address-order walk
        let mut bp = PROLOGUE;
        let mut walked_free = 0usize;
        let mut prev_free = false;
        loop {
            let header = block::header_of(bp);
            if header == epilogue_at {
                break;
            }
            if bp % ALIGNMENT != 0 {
                return Some(Violation::Misaligned { at: bp });
            }

            let tag = block::read_tag(bytes, header);
            let size = tag.size();
            if size == 0 {
                // only the epilogue may carry a zero size
                return Some(Violation::OutOfBounds { at: bp });
            }
            let Some(next_bp) = bp.checked_add(size) else {
                return Some(Violation::OutOfBounds { at: bp });
            };
            if block::header_of(next_bp) > epilogue_at {
                return Some(Violation::OutOfBounds { at: bp });
            }

            if block::read_tag(bytes, bp + size - OVERHEAD) != tag {
                return Some(Violation::TagMismatch { at: bp });
            }

            if tag.is_allocated() {
                prev_free = false;
            } else {
                if prev_free {
                    return Some(Violation::AdjacentFree { at: bp });
                }
                prev_free = true;
                walked_free += 1;
            }

            bp = next_bp;
        }

        // the free list must reach exactly the walk's free blocks
        let mut listed = 0usize;
        let mut prev = list::NIL;
        let mut cur = list::head(bytes);
        while cur != list::NIL {
            if cur % ALIGNMENT != 0 {
                return Some(Violation::Misaligned { at: cur });
            }
            if cur < PROLOGUE + OVERHEAD || cur.checked_add(2 * WORD).map_or(true, |e| e > end) {
                return Some(Violation::OutOfBounds { at: cur });
            }
            if block::read_tag(bytes, block::header_of(cur)).is_allocated() {
                return Some(Violation::AllocatedInList { at: cur });
            }
            if list::prev_link(bytes, cur) != prev {
                return Some(Violation::BrokenLink { at: cur });
            }

            listed += 1;
            if listed > walked_free {
                // more entries than free blocks: a duplicate or a cycle
                return Some(Violation::FreeCountMismatch { walked: walked_free, listed });
            }
            prev = cur;
            cur = list::next_link(bytes, cur);
        }
        if listed != walked_free {
            return Some(Violation::FreeCountMismatch { walked: walked_free, listed });
        }

        None
    }
}
