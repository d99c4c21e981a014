//! The backing memory primitive.
//!
//! A [`Heap`](crate::Heap) is generic over its [`MemorySource`], the policy
//! that owns the arena bytes and decides whether a growth request can be
//! honored. The arena is append-only and contiguous: a grant extends the
//! buffer in place and every previously issued offset stays valid. Nothing
//! is ever handed back.

/// Owner of a heap's arena bytes.
pub trait MemorySource {
    /// Extends the arena by exactly `delta` bytes.
    ///
    /// Returns the offset of the first new byte, which is the old arena
    /// size, or `None` if the request cannot be honored. A refusal must leave the
    /// arena untouched. New bytes may hold anything; the heap writes its
    /// own metadata before reading them.
    fn grow_arena(&mut self, delta: usize) -> Option<usize>;

    /// The arena contents.
    fn bytes(&self) -> &[u8];

    /// The arena contents, writable.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Current arena size in bytes.
    fn arena_size(&self) -> usize {
        self.bytes().len()
    }
}

/// A `Vec`-backed arena with a hard size limit.
///
/// The limit is the exhaustion model: a growth request that would push the
/// arena past it fails, and the heap surfaces that as allocation failure.
/// A small limit doubles as a deterministic out-of-memory fixture in tests.
#[derive(Debug, Clone)]
pub struct BoundedSource {
    arena: Vec<u8>,
    limit: usize,
}

impl BoundedSource {
    /// Default arena limit: 16 MiB.
    pub const DEFAULT_LIMIT: usize = 16 * 1024 * 1024;

    /// A source capped at [`DEFAULT_LIMIT`](Self::DEFAULT_LIMIT).
    pub fn new() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }

    /// A source capped at `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self { arena: Vec::new(), limit }
    }

    /// The configured limit in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for BoundedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for BoundedSource {
    fn grow_arena(&mut self, delta: usize) -> Option<usize> {
        let old = self.arena.len();
        let new = old.checked_add(delta)?;
        if new > self.limit {
            log::debug!("arena limit reached: {old} + {delta} bytes exceeds {}", self.limit);
            return None;
        }

        self.arena.resize(new, 0);
        log::trace!("arena grown by {delta} bytes to {new}");
        Some(old)
    }

    fn bytes(&self) -> &[u8] {
        &self.arena
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.arena
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_are_sequential_and_zeroed() {
        let mut source = BoundedSource::with_limit(256);
        assert_eq!(source.grow_arena(64), Some(0));
        assert_eq!(source.grow_arena(32), Some(64));
        assert_eq!(source.arena_size(), 96);
        assert!(source.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn refusal_leaves_the_arena_untouched() {
        let mut source = BoundedSource::with_limit(100);
        assert_eq!(source.grow_arena(96), Some(0));
        source.bytes_mut()[0] = 0xab;

        assert_eq!(source.grow_arena(8), None);
        assert_eq!(source.arena_size(), 96);
        assert_eq!(source.bytes()[0], 0xab);

        // a request within the limit still succeeds afterwards
        assert_eq!(source.grow_arena(4), Some(96));
    }

    #[test]
    fn huge_requests_fail_cleanly() {
        let mut source = BoundedSource::new();
        assert_eq!(source.grow_arena(usize::MAX), None);
    }
}
