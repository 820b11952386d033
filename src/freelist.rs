use crate::{
    block::{BLOCK_HEADER_SIZE, Block, BlockPtr, usable_size},
    list::{Iter, Link, List, Node},
};

/// Linked list to keep track of free [`Block`]s.
///
/// The links live inside the block headers themselves, so keeping track of
/// a free block costs nothing on top of its header. Members are kept in
/// ascending address order:
///
/// ```text
///                              Free List
///
///        +-------------------------+    +------------------------------+
///        |                         |    |                              |
/// +------|-----+-----------+-------|----|-+-----------+-----------+----|-------+
/// |   Free     |   Block   |     Free     |   Block   |   Block   |    Free    |
/// +------------+-----------+--------------+-----------+-----------+------------+
/// low                                                                allocated_top
/// ```
///
/// Allocated blocks are never members, so list membership is what tells a
/// free block apart from an allocated one.
pub(crate) struct FreeList {
    /// Free block headers, ascending by address.
    blocks: List<Block>,
}

impl FreeList {
    /// Creates a new empty FreeList.
    pub const fn new() -> Self {
        Self { blocks: List::new() }
    }

    /// It tells whether the FreeList is empty or not.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    pub fn first(&self) -> Link<Node<Block>> {
        self.blocks.first()
    }

    pub fn iter(&self) -> Iter<'_, Block> {
        self.blocks.iter()
    }

    /// Tells whether `block` is currently free.
    ///
    /// **SAFETY**: `block` must point to an initialized header.
    pub unsafe fn contains(&self, block: BlockPtr) -> bool {
        unsafe { self.blocks.contains(block) }
    }

    /// Inserts a detached `block` at its address-ordered position.
    ///
    /// **SAFETY**: `block` must point to an initialized, detached header
    /// inside the arena.
    pub unsafe fn insert(&mut self, block: BlockPtr) {
        unsafe { self.blocks.insert(block) }
    }

    /// Removes `block` from the FreeList. Blocks that are not members are
    /// left alone.
    ///
    /// **SAFETY**: `block` must point to an initialized header.
    pub unsafe fn remove(&mut self, block: BlockPtr) {
        unsafe { self.blocks.remove(block) }
    }

    /// Returns the first block, in address order, that can hold `size` bytes
    /// with a full header of slack to spare.
    ///
    /// The slack guarantees that a block found here can always be split
    /// without leaving an unusable remainder behind.
    pub fn find_first_fit(&self, size: usize) -> Link<Node<Block>> {
        let needed = size.checked_add(BLOCK_HEADER_SIZE)?;
        self.find(needed)
    }

    /// Returns the first block, in address order, with at least `size`
    /// usable bytes.
    pub fn find_fit(&self, size: usize) -> Link<Node<Block>> {
        self.find(size)
    }

    fn find(&self, needed: usize) -> Link<Node<Block>> {
        if self.is_empty() {
            return None;
        }

        self.blocks
            .iter()
            .find(|block| unsafe { usable_size(*block) } >= needed)
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use super::*;
    use crate::block::{init, payload_of};

    /// Lays out consecutive blocks with the given sizes in `memory`.
    fn layout(memory: &mut [u64], sizes: &[usize]) -> Vec<BlockPtr> {
        let mut addr = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();
        let mut blocks = Vec::new();

        for size in sizes {
            unsafe {
                let block = init(addr, *size);
                addr = payload_of(block).add(*size);
                blocks.push(block);
            }
        }

        blocks
    }

    #[test]
    fn empty_list_finds_nothing() {
        let list = FreeList::new();

        assert!(list.is_empty());
        assert!(list.find_first_fit(0).is_none());
        assert!(list.find_fit(0).is_none());
    }

    #[test]
    fn first_fit_requires_header_slack() {
        let mut memory = vec![0u64; 128];
        let blocks = layout(&mut memory, &[16, 64, 200]);
        let mut list = FreeList::new();

        unsafe {
            list.insert(blocks[2]);
            list.insert(blocks[0]);
        }

        // 64 is not a member, 200 is the first one with room for 48 + header.
        assert_eq!(list.find_first_fit(48), Some(blocks[2]));
        assert_eq!(list.find_fit(16), Some(blocks[0]));
        assert_eq!(list.find_first_fit(16), Some(blocks[2]));
        assert!(list.find_first_fit(200).is_none());
        assert_eq!(list.find_fit(200), Some(blocks[2]));
    }

    #[test]
    fn insert_orders_by_address_and_remove_detaches() {
        let mut memory = vec![0u64; 128];
        let blocks = layout(&mut memory, &[8, 8, 8, 8]);
        let mut list = FreeList::new();

        unsafe {
            list.insert(blocks[3]);
            list.insert(blocks[1]);
            list.insert(blocks[2]);

            assert_eq!(list.iter().collect::<Vec<_>>(), vec![blocks[1], blocks[2], blocks[3]]);
            assert!(!list.contains(blocks[0]));

            list.remove(blocks[2]);
            list.remove(blocks[0]);

            assert_eq!(list.iter().collect::<Vec<_>>(), vec![blocks[1], blocks[3]]);
            assert!(!list.contains(blocks[2]));
        }
    }
}
