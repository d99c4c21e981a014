#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod block;
mod check;
#[cfg(feature = "counters")]
mod counters;
mod heap;
mod list;
mod source;

pub use check::{BlockInfo, Blocks, CheckFailed, Violation};
#[cfg(feature = "counters")]
pub use counters::Counters;
pub use heap::{Address, Heap};
pub use source::{BoundedSource, MemorySource};

/// One machine word. Headers, footers, and free-list links are each one word.
pub(crate) const WORD: usize = core::mem::size_of::<usize>();

/// Payload alignment guarantee: two machine words.
///
/// Block sizes are multiples of this, which keeps the low bits of every
/// size free for the allocated flag.
pub const ALIGNMENT: usize = 2 * WORD;

/// Per-block metadata cost: one header word plus one footer word.
pub const OVERHEAD: usize = 2 * WORD;

/// Smallest representable block: header, footer, and the two link words a
/// free block must be able to hold. Allocations round up to at least this,
/// and split remainders below it are never created.
pub const MIN_BLOCK: usize = 2 * OVERHEAD;

/// Default growth quantum in bytes. The arena is extended by at least this
/// much at a time so small allocations don't each pay for a growth.
pub const CHUNK_SIZE: usize = 4096;
