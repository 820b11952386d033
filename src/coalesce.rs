//! Merging of physically adjacent free blocks.
//!
//! Two free blocks are merged when the end of the first one is the header of
//! the second one. Because the free list is sorted by address, the only
//! candidates for a block are its list neighbours:
//!
//! ```text
//!  before: +--------+------------+--------+----------+
//!          |  Free  | Just freed |  Free  |  Block   |
//!          +--------+------------+--------+----------+
//!
//!  after:  +------------------------------+----------+
//!          |             Free             |  Block   |
//!          +------------------------------+----------+
//! ```

use crate::{
    block::{BLOCK_HEADER_SIZE, BlockPtr, is_adjacent},
    freelist::FreeList,
};

impl FreeList {
    /// Absorbs every free block that directly follows `node` in memory.
    /// `node` must already be a member of the list.
    ///
    /// **SAFETY**: `node` must point to a free block of this list.
    pub(crate) unsafe fn merge_with_next(&mut self, mut node: BlockPtr) {
        unsafe {
            while let Some(next) = node.as_ref().next {
                if !is_adjacent(node, next) {
                    break;
                }

                // Unlink first so the list never sees the absorbed header.
                let absorbed = BLOCK_HEADER_SIZE + next.as_ref().data.size;
                self.remove(next);
                node.as_mut().data.size += absorbed;
            }
        }
    }

    /// Lets every free block that directly precedes `node` in memory absorb
    /// it. Returns the block that now covers `node`.
    ///
    /// **SAFETY**: `node` must point to a free block of this list.
    pub(crate) unsafe fn merge_with_prev(&mut self, mut node: BlockPtr) -> BlockPtr {
        unsafe {
            while let Some(mut prev) = node.as_ref().prev {
                if !is_adjacent(prev, node) {
                    break;
                }

                let absorbed = BLOCK_HEADER_SIZE + node.as_ref().data.size;
                self.remove(node);
                prev.as_mut().data.size += absorbed;

                node = prev;
            }
        }

        node
    }

    /// Merges `node` with all of its free physical neighbours, forward first
    /// and then backward. Returns the resulting block.
    ///
    /// **SAFETY**: `node` must point to a free block of this list.
    pub(crate) unsafe fn coalesce(&mut self, node: BlockPtr) -> BlockPtr {
        unsafe {
            self.merge_with_next(node);
            self.merge_with_prev(node)
        }
    }
}
