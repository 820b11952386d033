use std::ptr::{self, NonNull};

use log::trace;
use snafu::{OptionExt as _, ensure};

use crate::{
    arena::Arena,
    block::{self, BLOCK_HEADER_SIZE, BlockPtr, MIN_SPLIT},
    config::HeapConfig,
    error::{AllocError, RequestTooLargeSnafu, SizeOverflowSnafu},
    freelist::FreeList,
    kernel::ProgramBreak,
    utils::align8,
};

#[cfg(unix)]
use crate::kernel::Sbrk;

/// Largest request [`Heap::allocate`] accepts. Anything above cannot be
/// represented as a block once aligned and prefixed with a header.
pub const MAX_REQUEST: usize = (isize::MAX as usize - BLOCK_HEADER_SIZE) & !7;

/// A first-fit heap with in-band headers and an address-ordered free list,
/// carved out of a single arena that grows through a [`ProgramBreak`].
///
/// ```text
/// low                                                  allocated_top
///  +--------+---------+--------+---------+------------+
///  | Header | Payload | Header | Payload |    ...     |
///  +--------+---------+--------+---------+------------+
///           ^
///           +-- pointer handed to the user
/// ```
///
/// Every block is either allocated, and in no list, or free, and linked in
/// the free list. Released memory is recycled, it is never given back to the
/// operating system.
///
/// A `Heap` is not thread safe: every operation takes `&mut self`. Wrap it
/// in a [`crate::LockedHeap`] to share it.
pub struct Heap<B: ProgramBreak> {
    pub(crate) arena: Arena<B>,
    pub(crate) free_list: FreeList,
}

// The heap exclusively owns the arena and every block header in it.
unsafe impl<B: ProgramBreak + Send> Send for Heap<B> {}

#[cfg(unix)]
impl Heap<Sbrk> {
    /// Creates a heap on top of the process break. Nothing is requested from
    /// the operating system until the first allocation.
    pub const fn new() -> Self {
        Self::with_break(Sbrk)
    }
}

#[cfg(unix)]
impl Default for Heap<Sbrk> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ProgramBreak> Heap<B> {
    /// Creates a heap growing through `brk` with the default configuration.
    pub const fn with_break(brk: B) -> Self {
        Self::with_config(brk, HeapConfig::DEFAULT)
    }

    pub const fn with_config(brk: B, config: HeapConfig) -> Self {
        Self {
            arena: Arena::new(brk, config.growth_unit),
            free_list: FreeList::new(),
        }
    }

    /// The program break this heap grows through.
    pub fn program_break(&self) -> &B {
        self.arena.program_break()
    }

    pub fn config(&self) -> HeapConfig {
        HeapConfig {
            growth_unit: self.arena.growth_unit(),
        }
    }

    /// Allocates `size` uninitialized bytes and returns a pointer to them.
    ///
    /// The request is rounded up to a multiple of 8. The first free block
    /// that can be split is preferred; failing that, the first free block
    /// that fits at all is taken whole. Only when no free block fits does
    /// the arena grow.
    ///
    /// Fails only when the arena cannot grow.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        ensure!(size <= MAX_REQUEST, RequestTooLargeSnafu { size });
        let size = align8(size);

        let block = match self.take_free_block(size) {
            Some(block) => block,
            None => self.extend_heap(size)?,
        };

        let payload = block::payload_of(block);
        trace!("allocate({size}) -> {payload:p}");

        Ok(payload)
    }

    /// Allocates room for `count` elements of `size` bytes each and zeroes
    /// exactly `count * size` bytes of it.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        let total = count.checked_mul(size).context(SizeOverflowSnafu { count, size })?;
        let payload = self.allocate(total)?;

        unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };

        Ok(payload)
    }

    /// Gives the block owning `ptr` back to the heap. Releasing a null
    /// pointer does nothing.
    ///
    /// The block joins the free list and is merged with every free block it
    /// touches.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this heap that has not
    /// been released since. The allocator does not validate it.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        unsafe { self.release_block(block::header_of(payload)) };

        trace!("release({payload:p})");
    }

    /// Usable size of the block owning `ptr`. It is at least the size that
    /// was requested for it.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { block::usable_size(block::header_of(ptr)) }
    }

    /// Finds a free block for `size` bytes and detaches it, splitting off the
    /// unused tail when it is big enough to form a block of its own.
    fn take_free_block(&mut self, size: usize) -> Option<BlockPtr> {
        let block = self
            .free_list
            .find_first_fit(size)
            .or_else(|| self.free_list.find_fit(size))?;

        unsafe {
            self.free_list.remove(block);

            if block::usable_size(block) - size >= MIN_SPLIT {
                // Neighbours of a free block are never free, so the tail
                // cannot touch another free block.
                let remainder = block::split(block, size);
                self.free_list.insert(remainder);
            }
        }

        Some(block)
    }

    /// Carves a brand new block of `size` usable bytes from the top of the
    /// arena.
    fn extend_heap(&mut self, size: usize) -> Result<BlockPtr, AllocError> {
        let addr = self.arena.extend(BLOCK_HEADER_SIZE + size)?;

        Ok(unsafe { block::init(addr, size) })
    }

    /// Links a detached block in the free list and merges it with its free
    /// neighbours.
    ///
    /// **SAFETY**: `block` must be an allocated block of this heap.
    pub(crate) unsafe fn release_block(&mut self, block: BlockPtr) {
        unsafe {
            self.free_list.insert(block);
            self.free_list.coalesce(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Reservation;

    const UNIT: usize = 65536;

    fn heap(capacity: usize) -> Heap<Reservation> {
        Heap::with_break(Reservation::new(capacity).unwrap())
    }

    #[test]
    fn allocations_are_disjoint_and_aligned() {
        let mut heap = heap(UNIT);

        let first = heap.allocate(100).unwrap();
        let second = heap.allocate(200).unwrap();

        assert_eq!(first.addr().get() % 8, 0);
        assert_eq!(second.addr().get() % 8, 0);
        assert!(first.addr().get() + 100 <= second.addr().get());
        assert_eq!(second.addr().get() - first.addr().get(), 104 + BLOCK_HEADER_SIZE);
        assert_eq!(unsafe { heap.usable_size(first) }, 104);
    }

    #[test]
    fn released_block_is_reused() {
        let mut heap = heap(UNIT);

        let first = heap.allocate(100).unwrap();
        unsafe { heap.release(first.as_ptr()) };
        let second = heap.allocate(100).unwrap();

        assert_eq!(first, second);
        assert!(heap.free_list.is_empty());
    }

    #[test]
    fn splits_large_free_blocks() {
        let mut heap = heap(UNIT);

        let big = heap.allocate(512).unwrap();
        let _guard = heap.allocate(8).unwrap();
        unsafe { heap.release(big.as_ptr()) };

        let small = heap.allocate(64).unwrap();

        assert_eq!(small, big);
        assert_eq!(unsafe { heap.usable_size(small) }, 64);
        assert_eq!(heap.free_list.len(), 1);

        let remainder = heap.free_list.first().unwrap();
        assert_eq!(unsafe { block::usable_size(remainder) }, 512 - 64 - BLOCK_HEADER_SIZE);
    }

    #[test]
    fn consumes_blocks_too_small_to_split() {
        let mut heap = heap(UNIT);

        let block = heap.allocate(64).unwrap();
        let _guard = heap.allocate(8).unwrap();
        unsafe { heap.release(block.as_ptr()) };

        // 64 - 48 leaves less than a header plus 8 bytes.
        let again = heap.allocate(48).unwrap();

        assert_eq!(again, block);
        assert_eq!(unsafe { heap.usable_size(again) }, 64);
        assert!(heap.free_list.is_empty());
    }

    #[test]
    fn coalesced_blocks_serve_larger_requests() {
        let mut heap = heap(UNIT);

        let first = heap.allocate(100).unwrap();
        let second = heap.allocate(200).unwrap();
        let extensions = heap.arena.extensions();

        unsafe {
            heap.release(first.as_ptr());
            heap.release(second.as_ptr());
        }
        assert_eq!(heap.free_list.len(), 1);

        let merged = heap.allocate(320).unwrap();

        assert_eq!(merged, first);
        assert_eq!(heap.arena.extensions(), extensions);
    }

    #[test]
    fn zero_allocate_zeroes_requested_bytes() {
        let mut heap = heap(UNIT);

        let dirty = heap.allocate(40).unwrap();
        unsafe {
            ptr::write_bytes(dirty.as_ptr(), 0xFF, 40);
            heap.release(dirty.as_ptr());
        }

        let zeroed = heap.zero_allocate(10, 4).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(zeroed.as_ptr(), 40) };

        assert_eq!(zeroed, dirty);
        assert!(bytes.iter().all(|byte| *byte == 0));
    }

    #[test]
    fn zero_allocate_detects_overflow() {
        let mut heap = heap(UNIT);

        assert_eq!(
            heap.zero_allocate(usize::MAX, 2),
            Err(AllocError::SizeOverflow { count: usize::MAX, size: 2 })
        );
        assert!(heap.arena.bounds().is_none());
    }

    #[test]
    fn release_null_is_a_no_op() {
        let mut heap = heap(UNIT);
        let live = heap.allocate(16).unwrap();

        unsafe { heap.release(ptr::null_mut()) };

        assert!(heap.free_list.is_empty());
        assert_eq!(unsafe { heap.usable_size(live) }, 16);
    }

    #[test]
    fn out_of_memory_is_reported() {
        let mut heap = heap(UNIT);

        let live = heap.allocate(UNIT - BLOCK_HEADER_SIZE).unwrap();

        assert_eq!(heap.allocate(8), Err(AllocError::OutOfMemory { delta: UNIT }));
        assert_eq!(heap.allocate(MAX_REQUEST + 1), Err(AllocError::RequestTooLarge { size: MAX_REQUEST + 1 }));

        unsafe { heap.release(live.as_ptr()) };
        assert!(heap.allocate(8).is_ok());
    }
}
