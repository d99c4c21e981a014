//! The explicit free list.
//!
//! Free blocks overlay two link words on the start of their payload: the
//! previous-free link first, the next-free link one word later. The list is
//! unordered and doubly linked, anchored by a head cell that occupies the
//! arena's first word, below the prologue. Insertion is always at the head,
//! so traversal visits the most recently freed blocks first.
//!
//! [`insert_head`] and [`remove`] are the only ways blocks enter or leave
//! the list; placement, coalescing, and growth all route through them so
//! the linkage cannot drift out of sync with the boundary tags.

use crate::{block, WORD};

/// Offset of the list-head cell.
pub(crate) const HEAD: usize = 0;

/// The null link. No block payload can sit at offset 0; the head cell does.
pub(crate) const NIL: usize = 0;

const PREV_LINK: usize = 0;
const NEXT_LINK: usize = WORD;

pub(crate) fn head(bytes: &[u8]) -> usize {
    block::read_word(bytes, HEAD)
}

pub(crate) fn set_head(bytes: &mut [u8], bp: usize) {
    block::write_word(bytes, HEAD, bp);
}

pub(crate) fn prev_link(bytes: &[u8], bp: usize) -> usize {
    block::read_word(bytes, bp + PREV_LINK)
}

pub(crate) fn next_link(bytes: &[u8], bp: usize) -> usize {
    block::read_word(bytes, bp + NEXT_LINK)
}

fn set_prev_link(bytes: &mut [u8], bp: usize, to: usize) {
    block::write_word(bytes, bp + PREV_LINK, to);
}

fn set_next_link(bytes: &mut [u8], bp: usize, to: usize) {
    block::write_word(bytes, bp + NEXT_LINK, to);
}

/// Links the free block at `bp` in as the new list head.
pub(crate) fn insert_head(bytes: &mut [u8], bp: usize) {
    let old = head(bytes);
    if old != NIL {
        set_prev_link(bytes, old, bp);
    }
    set_prev_link(bytes, bp, NIL);
    set_next_link(bytes, bp, old);
    set_head(bytes, bp);
}

/// Splices the block at `bp` out of the list.
///
/// `bp` must currently be linked; removing an unlinked block corrupts the
/// list. The degenerate empty-list and nil cases are tolerated as no-ops.
pub(crate) fn remove(bytes: &mut [u8], bp: usize) {
    if bp == NIL || head(bytes) == NIL {
        return;
    }

    let prev = prev_link(bytes, bp);
    let next = next_link(bytes, bp);

    match (prev, next) {
        (NIL, NIL) => set_head(bytes, NIL),
        (NIL, next) => {
            set_head(bytes, next);
            set_prev_link(bytes, next, NIL);
        }
        (prev, NIL) => set_next_link(bytes, prev, NIL),
        (prev, next) => {
            set_next_link(bytes, prev, next);
            set_prev_link(bytes, next, prev);
        }
    }
}

/// Iterates the list from the head.
pub(crate) fn iter(bytes: &[u8]) -> Iter<'_> {
    Iter { bytes, cur: head(bytes) }
}

#[derive(Debug, Clone, Copy)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub(crate) struct Iter<'a> {
    bytes: &'a [u8],
    cur: usize,
}

impl Iterator for Iter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cur == NIL {
            return None;
        }
        let bp = self.cur;
        self.cur = next_link(self.bytes, bp);
        Some(bp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: usize = 4 * WORD;
    const B: usize = 8 * WORD;
    const C: usize = 12 * WORD;

    fn arena() -> Vec<u8> {
        vec![0u8; 16 * WORD]
    }

    #[test]
    fn inserts_at_the_head() {
        let bytes = &mut arena()[..];
        insert_head(bytes, A);
        insert_head(bytes, B);
        insert_head(bytes, C);

        assert_eq!(iter(bytes).collect::<Vec<_>>(), [C, B, A]);
        assert_eq!(prev_link(bytes, C), NIL);
        assert_eq!(prev_link(bytes, B), C);
        assert_eq!(prev_link(bytes, A), B);
    }

    #[test]
    fn removes_the_only_entry() {
        let bytes = &mut arena()[..];
        insert_head(bytes, A);
        remove(bytes, A);

        assert_eq!(head(bytes), NIL);
        assert_eq!(iter(bytes).count(), 0);
    }

    #[test]
    fn removes_first_middle_and_last() {
        let bytes = &mut arena()[..];
        for bp in [A, B, C] {
            insert_head(bytes, bp);
        }

        remove(bytes, B);
        assert_eq!(iter(bytes).collect::<Vec<_>>(), [C, A]);
        assert_eq!(prev_link(bytes, A), C);

        remove(bytes, C);
        assert_eq!(iter(bytes).collect::<Vec<_>>(), [A]);
        assert_eq!(prev_link(bytes, A), NIL);

        insert_head(bytes, B);
        remove(bytes, A);
        assert_eq!(iter(bytes).collect::<Vec<_>>(), [B]);
        assert_eq!(next_link(bytes, B), NIL);
    }

    #[test]
    fn remove_tolerates_the_degenerate_cases() {
        let bytes = &mut arena()[..];
        remove(bytes, A);
        remove(bytes, NIL);
        assert_eq!(head(bytes), NIL);

        insert_head(bytes, A);
        remove(bytes, NIL);
        assert_eq!(iter(bytes).collect::<Vec<_>>(), [A]);
    }
}
