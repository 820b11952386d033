//! Inspection of a [`Heap`]: walking every block in address order,
//! collecting statistics and verifying the heap invariants.

use std::ptr::NonNull;

use snafu::ensure;

use crate::{
    block::{self, BlockPtr},
    error::{
        AdjacentFreeBlocksSnafu, HeapCheckError, MisalignedSizeSnafu, OrphanFreeBlockSnafu, OverrunSnafu,
        UnsortedFreeListSnafu,
    },
    heap::Heap,
    kernel::ProgramBreak,
    utils::ALIGNMENT,
};

/// One block met while walking the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// First usable byte of the block.
    pub payload: NonNull<u8>,
    /// Usable size in bytes.
    pub size: usize,
    /// Whether the block is in the free list.
    pub free: bool,
}

/// Figures about a [`Heap`], as returned by [`Heap::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes between the start of the arena and its allocated top, headers
    /// included.
    pub arena_bytes: usize,
    /// Bytes requested from the program break so far.
    pub committed_bytes: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    /// Number of times the program break was extended.
    pub extensions: usize,
}

/// Iterator over every block of a heap in address order, see
/// [`Heap::blocks`].
pub struct Blocks<'a, B: ProgramBreak> {
    heap: &'a Heap<B>,
    current: usize,
    top: usize,
}

impl<B: ProgramBreak> Iterator for Blocks<'_, B> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.top {
            return None;
        }

        let header = self.heap.block_at(self.current)?;

        unsafe {
            let info = BlockInfo {
                payload: block::payload_of(header),
                size: block::usable_size(header),
                free: self.heap.free_list.contains(header),
            };
            self.current = block::end_of(header);

            Some(info)
        }
    }
}

impl<B: ProgramBreak> Heap<B> {
    /// Walks the arena from its start to its allocated top, one block at a
    /// time.
    pub fn blocks(&self) -> Blocks<'_, B> {
        let (current, top) = match self.arena.bounds() {
            Some(bounds) => (bounds.low.addr().get(), bounds.allocated_top.addr().get()),
            None => (0, 0),
        };

        Blocks {
            heap: self,
            current,
            top,
        }
    }

    /// Header located at `addr`, derived from the arena start so the pointer
    /// stays within the arena's provenance.
    fn block_at(&self, addr: usize) -> Option<BlockPtr> {
        let low = self.arena.bounds()?.low;
        let offset = addr.checked_sub(low.addr().get())?;

        Some(unsafe { low.add(offset).cast() })
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            extensions: self.arena.extensions(),
            ..HeapStats::default()
        };

        if let Some(bounds) = self.arena.bounds() {
            stats.arena_bytes = bounds.allocated_top.addr().get() - bounds.low.addr().get();
            stats.committed_bytes = bounds.committed_top.addr().get().saturating_sub(bounds.low.addr().get());
        }

        for info in self.blocks() {
            if info.free {
                stats.free_blocks += 1;
                stats.free_bytes += info.size;
                stats.largest_free = stats.largest_free.max(info.size);
            } else {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += info.size;
            }
        }

        stats
    }

    /// Verifies the heap invariants:
    ///
    /// - every block size is a multiple of 8,
    /// - the free list is strictly ascending,
    /// - no two free blocks touch,
    /// - the blocks tile the arena exactly up to its allocated top,
    /// - every free list member is one of those blocks.
    ///
    /// Corrupted headers can make this walk wander off, it is meant to check
    /// a heap used according to its contract.
    pub fn check(&self) -> Result<HeapStats, HeapCheckError> {
        let mut previous_free: Option<usize> = None;
        for block in self.free_list.iter() {
            let addr = block.addr().get();
            ensure!(previous_free.is_none_or(|previous| previous < addr), UnsortedFreeListSnafu { addr });
            previous_free = Some(addr);
        }

        let top = self
            .arena
            .bounds()
            .map_or(0, |bounds| bounds.allocated_top.addr().get());

        let mut walked_free = 0;
        let mut previous_was_free: Option<usize> = None;
        let mut walk = self.blocks();

        while walk.current < top {
            let addr = walk.current;
            let Some(info) = walk.next() else {
                break;
            };

            ensure!(info.size % ALIGNMENT == 0, MisalignedSizeSnafu { addr, size: info.size });
            ensure!(walk.current <= top, OverrunSnafu { addr, top });

            if info.free {
                if let Some(first) = previous_was_free {
                    return AdjacentFreeBlocksSnafu { first, second: addr }.fail();
                }
                walked_free += 1;
                previous_was_free = Some(addr);
            } else {
                previous_was_free = None;
            }
        }

        if walked_free != self.free_list.len() {
            // Some member was never met on the walk, find the first one.
            let walked: Vec<usize> = self
                .blocks()
                .filter(|info| info.free)
                .map(|info| info.payload.addr().get())
                .collect();

            let orphan = self
                .free_list
                .iter()
                .find(|block| !walked.contains(&block::payload_of(*block).addr().get()))
                .map_or(0, |block| block.addr().get());

            return OrphanFreeBlockSnafu { addr: orphan }.fail();
        }

        Ok(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BLOCK_HEADER_SIZE, error::HeapCheckError, kernel::Reservation};

    const UNIT: usize = 65536;

    fn heap() -> Heap<Reservation> {
        Heap::with_break(Reservation::new(UNIT).unwrap())
    }

    #[test]
    fn empty_heap_has_no_blocks() {
        let heap = heap();

        assert_eq!(heap.blocks().count(), 0);
        assert_eq!(heap.check(), Ok(HeapStats::default()));
    }

    #[test]
    fn walk_reports_every_block() {
        let mut heap = heap();

        let first = heap.allocate(16).unwrap();
        let second = heap.allocate(32).unwrap();
        let third = heap.allocate(48).unwrap();
        unsafe { heap.release(second.as_ptr()) };

        let blocks: Vec<BlockInfo> = heap.blocks().collect();

        assert_eq!(
            blocks,
            vec![
                BlockInfo { payload: first, size: 16, free: false },
                BlockInfo { payload: second, size: 32, free: true },
                BlockInfo { payload: third, size: 48, free: false },
            ]
        );
    }

    #[test]
    fn stats_add_up() {
        let mut heap = heap();

        let _first = heap.allocate(16).unwrap();
        let second = heap.allocate(32).unwrap();
        let _third = heap.allocate(48).unwrap();
        unsafe { heap.release(second.as_ptr()) };

        let stats = heap.check().unwrap();

        assert_eq!(stats.allocated_blocks, 2);
        assert_eq!(stats.allocated_bytes, 64);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, 32);
        assert_eq!(stats.largest_free, 32);
        assert_eq!(stats.arena_bytes, 96 + 3 * BLOCK_HEADER_SIZE);
        assert_eq!(stats.committed_bytes, UNIT);
        assert_eq!(stats.extensions, 1);
    }

    #[test]
    fn detects_adjacent_free_blocks() {
        let mut heap = heap();

        let first = heap.allocate(16).unwrap();
        let second = heap.allocate(16).unwrap();

        // Bypass coalescing on purpose.
        unsafe {
            heap.free_list.insert(block::header_of(first));
            heap.free_list.insert(block::header_of(second));
        }

        assert_eq!(
            heap.check(),
            Err(HeapCheckError::AdjacentFreeBlocks {
                first: unsafe { block::header_of(first) }.addr().get(),
                second: unsafe { block::header_of(second) }.addr().get(),
            })
        );
    }

    #[test]
    fn detects_misaligned_sizes() {
        let mut heap = heap();

        let block = heap.allocate(16).unwrap();
        let mut header = unsafe { block::header_of(block) };
        unsafe { header.as_mut().data.size = 12 };

        assert!(matches!(heap.check(), Err(HeapCheckError::MisalignedSize { size: 12, .. })));
    }
}
