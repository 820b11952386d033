use std::ptr::{self, NonNull};

use log::trace;
use snafu::ensure;

use crate::{
    block::{self, BLOCK_HEADER_SIZE, BlockPtr, MIN_SPLIT},
    error::{AllocError, RequestTooLargeSnafu},
    heap::{Heap, MAX_REQUEST},
    kernel::ProgramBreak,
    utils::align8,
};

impl<B: ProgramBreak> Heap<B> {
    /// Changes the size of the allocation at `ptr` to `new_size` bytes,
    /// keeping the first `min(old, new)` bytes of its contents.
    ///
    /// - A null `ptr` behaves like [`Heap::allocate`].
    /// - A `new_size` of zero releases the block and returns `Ok(None)`.
    /// - Otherwise the block is resized in place when it can be, growing into
    ///   a free block right behind it if needed. Only when that is not enough
    ///   is a new block allocated, the contents copied and the old block
    ///   released.
    ///
    /// When the new block cannot be allocated the error is returned and the
    /// old block is left exactly as it was.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation of this heap.
    pub unsafe fn resize(&mut self, ptr: *mut u8, new_size: usize) -> Result<Option<NonNull<u8>>, AllocError> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(new_size).map(Some);
        };

        if new_size == 0 {
            unsafe { self.release(ptr) };
            return Ok(None);
        }

        ensure!(new_size <= MAX_REQUEST, RequestTooLargeSnafu { size: new_size });
        let size = align8(new_size);

        unsafe {
            let block = block::header_of(payload);

            if self.grow_in_place(block, size) {
                self.shrink_in_place(block, size);
                trace!("resize({payload:p}, {new_size}) -> in place");

                return Ok(Some(payload));
            }

            let moved = self.allocate(size)?;
            let kept = block::usable_size(block).min(size);
            ptr::copy_nonoverlapping(payload.as_ptr(), moved.as_ptr(), kept);
            self.release_block(block);

            trace!("resize({payload:p}, {new_size}) -> moved to {moved:p}");

            Ok(Some(moved))
        }
    }

    /// Makes `block` hold at least `size` bytes without moving it, by
    /// absorbing the free block that directly follows it. Returns `false`,
    /// leaving everything untouched, when that is not enough.
    ///
    /// **SAFETY**: `block` must be an allocated block of this heap.
    unsafe fn grow_in_place(&mut self, mut block: BlockPtr, size: usize) -> bool {
        unsafe {
            let current = block::usable_size(block);
            if current >= size {
                return true;
            }

            let Some(next) = self.free_successor(block) else {
                return false;
            };

            let room = current + BLOCK_HEADER_SIZE + block::usable_size(next);
            if room < size {
                return false;
            }

            self.free_list.remove(next);
            block.as_mut().data.size = room;
        }

        true
    }

    /// Gives the tail of `block` beyond `size` bytes back to the heap, when
    /// it is large enough to become a block of its own.
    ///
    /// **SAFETY**: `block` must be an allocated block of this heap holding at
    /// least `size` bytes.
    unsafe fn shrink_in_place(&mut self, block: BlockPtr, size: usize) {
        unsafe {
            if block::usable_size(block) - size >= MIN_SPLIT {
                let remainder = block::split(block, size);
                // The tail may touch a free successor.
                self.release_block(remainder);
            }
        }
    }

    /// The block physically following `block`, if there is one and it is
    /// free.
    ///
    /// **SAFETY**: `block` must be a block of this heap.
    unsafe fn free_successor(&self, block: BlockPtr) -> Option<BlockPtr> {
        let top = self.arena.bounds()?.allocated_top.addr().get();

        unsafe {
            let next = block::next_of(block);
            if next.addr().get() >= top || !self.free_list.contains(next) {
                return None;
            }

            Some(next)
        }
    }
}
