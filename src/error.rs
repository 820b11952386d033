//! Error types of the allocator.
//!
//! Only recoverable conditions are errors. Passing a pointer this allocator never
//! returned, releasing a block twice or writing past a block's usable size are
//! contract violations: they are undefined behaviour and never show up here.

use snafu::Snafu;

/// Why an allocation request could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    /// The operating system refused to extend the arena.
    #[snafu(display("out of memory: the arena could not grow by {delta} bytes"))]
    OutOfMemory { delta: usize },

    /// `count * size` does not fit in a `usize`.
    #[snafu(display("size overflow: {count} elements of {size} bytes"))]
    SizeOverflow { count: usize, size: usize },

    /// The request cannot be represented once header and alignment are added.
    #[snafu(display("request of {size} bytes is too large"))]
    RequestTooLarge { size: usize },

    /// Somebody else moved the program break, so new memory would not be
    /// contiguous with the arena.
    #[snafu(display(
        "program break moved by a foreign caller: expected {expected:#x}, found {actual:#x}"
    ))]
    ForeignBreak { expected: usize, actual: usize },

    /// The address space reservation backing an arena could not be created.
    #[snafu(display("failed to reserve {capacity} bytes of address space"))]
    Reserve { capacity: usize },
}

/// Invalid [`crate::HeapConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("growth unit must be a power of two of at least 8 bytes, got {unit}"))]
    GrowthUnit { unit: usize },
}

/// An invariant violation found by [`crate::Heap::check`].
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapCheckError {
    #[snafu(display("block at {addr:#x} has unaligned size {size}"))]
    MisalignedSize { addr: usize, size: usize },

    #[snafu(display("free list is not strictly ascending at {addr:#x}"))]
    UnsortedFreeList { addr: usize },

    #[snafu(display("free blocks at {first:#x} and {second:#x} touch but were not coalesced"))]
    AdjacentFreeBlocks { first: usize, second: usize },

    #[snafu(display("block at {addr:#x} runs past the allocated top {top:#x}"))]
    Overrun { addr: usize, top: usize },

    #[snafu(display("free block at {addr:#x} is not part of the arena walk"))]
    OrphanFreeBlock { addr: usize },
}
