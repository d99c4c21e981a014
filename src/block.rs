//! Boundary tags and word-level access to the arena.
//!
//! A `Tag` is a block size with the allocated flag in the least significant
//! bit. Sizes are multiples of [`ALIGNMENT`], so the low bits are always
//! available for flags. Every block stores the same tag twice, one word at
//! each end, which is what lets a block reach backward to its neighbor's
//! size without any search.

use crate::{ALIGNMENT, WORD};

/// Reads the machine word at byte offset `at`.
pub(crate) fn read_word(bytes: &[u8], at: usize) -> usize {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&bytes[at..at + WORD]);
    usize::from_ne_bytes(word)
}

/// Writes `value` over the machine word at byte offset `at`.
pub(crate) fn write_word(bytes: &mut [u8], at: usize, value: usize) {
    bytes[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
}

/// Packed header/footer word of one block.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Tag(usize);

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("is_allocated", &self.is_allocated())
            .finish()
    }
}

impl Tag {
    pub(crate) const ALLOCATED_FLAG: usize = 1 << 0;

    const SIZE_MASK: usize = !(ALIGNMENT - 1);

    pub(crate) fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size & !Self::SIZE_MASK == 0);

        if allocated {
            Self(size | Self::ALLOCATED_FLAG)
        } else {
            Self(size)
        }
    }

    pub(crate) fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub(crate) fn size(self) -> usize {
        self.0 & Self::SIZE_MASK
    }

    pub(crate) fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_FLAG != 0
    }
}

/// Reads the tag at byte offset `at`.
pub(crate) fn read_tag(bytes: &[u8], at: usize) -> Tag {
    Tag::from_raw(read_word(bytes, at))
}

/// Writes `tag` at byte offset `at`.
pub(crate) fn write_tag(bytes: &mut [u8], at: usize, tag: Tag) {
    write_word(bytes, at, tag.0);
}

/// Header offset of the block whose payload starts at `payload`.
pub(crate) const fn header_of(payload: usize) -> usize {
    payload - WORD
}

/// Payload offset of the block whose header sits at `header`.
pub(crate) const fn payload_of(header: usize) -> usize {
    header + WORD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_packs_size_and_flag() {
        let tag = Tag::new(3 * ALIGNMENT, true);
        assert_eq!(tag.size(), 3 * ALIGNMENT);
        assert!(tag.is_allocated());

        let huge = usize::MAX & !(ALIGNMENT - 1);
        let tag = Tag::new(huge, false);
        assert_eq!(tag.size(), huge);
        assert!(!tag.is_allocated());
    }

    #[test]
    fn tags_compare_by_raw_word() {
        assert_eq!(Tag::new(4 * ALIGNMENT, false), Tag::from_raw(4 * ALIGNMENT));
        assert_ne!(Tag::new(4 * ALIGNMENT, true), Tag::new(4 * ALIGNMENT, false));
    }

    #[test]
    fn word_io_round_trips() {
        let mut bytes = [0u8; 4 * WORD];
        write_word(&mut bytes, WORD, 0xfeed);
        write_word(&mut bytes, 2 * WORD, usize::MAX);

        assert_eq!(read_word(&bytes, WORD), 0xfeed);
        assert_eq!(read_word(&bytes, 2 * WORD), usize::MAX);
        assert_eq!(read_word(&bytes, 0), 0);
    }

    #[test]
    fn geometry_inverts() {
        assert_eq!(header_of(payload_of(8 * WORD)), 8 * WORD);
    }
}
