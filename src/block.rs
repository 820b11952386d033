use std::{mem, ptr::NonNull};
use crate::{list::Node, utils::align8};

/// Header size of a block. The header is a [`Node<Block>`] because every
/// block may become a member of the free list, which keeps its links in the
/// same header as the size. Rounded up to 8 so payloads stay aligned on every
/// target.
pub const BLOCK_HEADER_SIZE: usize = align8(mem::size_of::<Node<Block>>());

/// Smallest payload a split-off remainder may have.
pub(crate) const MIN_PAYLOAD: usize = 8;

/// A remainder is only carved off a block when at least this many bytes are
/// left over: a full header plus the smallest payload.
pub(crate) const MIN_SPLIT: usize = BLOCK_HEADER_SIZE + MIN_PAYLOAD;

/// Pointer to a block header.
pub(crate) type BlockPtr = NonNull<Node<Block>>;

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed right after the header.
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |        prev         |        | -> Header (Node<Block>)
/// +---------------------+        |
/// |        size         |        |
/// +---------------------+ <------+ <- payload returned to the user
/// |       Content       |        |
/// |         ...         |        | -> `size` usable bytes
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// `next` and `prev` only mean something while the block is free. Allocated
/// blocks are detached from the free list and have both links cleared.
pub(crate) struct Block {
    /// Usable size of the payload, always a multiple of 8.
    pub size: usize,
}

/// Writes a fresh, detached header of `size` usable bytes at `addr`.
///
/// **SAFETY**: `addr` must be 8-aligned and valid for writes of
/// `BLOCK_HEADER_SIZE` bytes.
pub(crate) unsafe fn init(addr: NonNull<u8>, size: usize) -> BlockPtr {
    let block = addr.cast::<Node<Block>>();

    unsafe { block.write(Node::new(Block { size })) };

    block
}

/// Computes the header of the block owning `payload`.
///
/// **SAFETY**: `payload` must have been returned by this allocator.
#[inline]
pub(crate) unsafe fn header_of(payload: NonNull<u8>) -> BlockPtr {
    unsafe { payload.sub(BLOCK_HEADER_SIZE).cast() }
}

/// Address of the first usable byte of `block`.
#[inline]
pub(crate) fn payload_of(block: BlockPtr) -> NonNull<u8> {
    unsafe { block.cast::<u8>().add(BLOCK_HEADER_SIZE) }
}

/// Usable size of `block`.
///
/// **SAFETY**: `block` must point to an initialized header.
#[inline]
pub(crate) unsafe fn usable_size(block: BlockPtr) -> usize {
    unsafe { block.as_ref().data.size }
}

/// Address one past the last payload byte, i.e. where the physically next
/// block starts.
///
/// **SAFETY**: `block` must point to an initialized header.
#[inline]
pub(crate) unsafe fn end_of(block: BlockPtr) -> usize {
    unsafe { payload_of(block).addr().get() + usable_size(block) }
}

/// Header of the block physically following `block`. Only meaningful when
/// that address is below the allocated top of the arena.
///
/// **SAFETY**: `block` must point to an initialized header.
#[inline]
pub(crate) unsafe fn next_of(block: BlockPtr) -> BlockPtr {
    unsafe { payload_of(block).add(usable_size(block)).cast() }
}

/// Tells whether `second` starts exactly where `first` ends.
///
/// **SAFETY**: `first` must point to an initialized header.
#[inline]
pub(crate) unsafe fn is_adjacent(first: BlockPtr, second: BlockPtr) -> bool {
    unsafe { end_of(first) == second.addr().get() }
}

/// Shrinks `block` to `size` usable bytes and writes a detached header for
/// the leftover bytes right behind it. Returns the new trailing block.
///
/// **SAFETY**: `block` must point to an initialized header, `size` must be a
/// multiple of 8 and `block.size - size` at least [`MIN_SPLIT`].
pub(crate) unsafe fn split(mut block: BlockPtr, size: usize) -> BlockPtr {
    unsafe {
        let old_size = usable_size(block);
        debug_assert!(old_size >= size + MIN_SPLIT);

        block.as_mut().data.size = size;

        let remainder_addr = payload_of(block).add(size);
        init(remainder_addr, old_size - size - BLOCK_HEADER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8-aligned scratch memory standing in for the arena.
    fn scratch(words: usize) -> Box<[u64]> {
        vec![0; words].into_boxed_slice()
    }

    #[test]
    fn header_is_word_aligned() {
        assert_eq!(BLOCK_HEADER_SIZE % 8, 0);
        assert!(BLOCK_HEADER_SIZE >= mem::size_of::<Node<Block>>());
    }

    #[test]
    fn header_payload_round_trip() {
        let mut memory = scratch(16);
        let addr = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();

        unsafe {
            let block = init(addr, 64);
            let payload = payload_of(block);

            assert_eq!(payload.addr().get() - addr.addr().get(), BLOCK_HEADER_SIZE);
            assert_eq!(header_of(payload), block);
            assert_eq!(usable_size(block), 64);
            assert!(block.as_ref().next.is_none() && block.as_ref().prev.is_none());
        }
    }

    #[test]
    fn split_carves_trailing_block() {
        let mut memory = scratch(32);
        let addr = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();
        let total = 32 * 8 - BLOCK_HEADER_SIZE;

        unsafe {
            let block = init(addr, total);
            let remainder = split(block, 16);

            assert_eq!(usable_size(block), 16);
            assert!(is_adjacent(block, remainder));
            assert_eq!(next_of(block), remainder);
            assert_eq!(usable_size(remainder), total - 16 - BLOCK_HEADER_SIZE);
            assert_eq!(end_of(remainder), end_of(block) + BLOCK_HEADER_SIZE + usable_size(remainder));
            assert_eq!(end_of(remainder), addr.addr().get() + 32 * 8);
        }
    }
}
