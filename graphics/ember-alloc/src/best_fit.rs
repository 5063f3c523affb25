//! # Best-Fit Allocator
//!
//! Sub-allocates a linear address range `0..total_size`.
//!
//! Blocks form a gapless address-ordered list. Free blocks are additionally
//! threaded through an address-ordered free list. Allocation picks the
//! smallest free block that fits and splits off the remainder; freeing
//! re-inserts the block and merges it with free neighbours, always into the
//! earlier block, so no two adjacent free blocks survive an operation.
//!
//! ```text
//! address list:  [A 0..40][F 40..64][A 64..80][F 80..100]
//! free list:              [F 40..64] -------> [F 80..100]
//! high watermark:                           80 ^
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use ember_core::{SlotArena, SlotKey};

static NEXT_ALLOCATOR_ID: AtomicU32 = AtomicU32::new(1);

// =============================================================================
// ALLOCATION
// =============================================================================

/// Key of a block inside its allocator
pub type BlockId = SlotKey;

/// A sub-allocation
///
/// Only the allocator that produced it may free it, and only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alloc {
    /// First element
    pub start: u32,
    /// Element count
    pub size: u32,
    /// Allocated from the high (short-lived) end
    pub short_lived: bool,
    block: BlockId,
    owner: u32,
}

impl Alloc {
    /// One past the last element
    #[inline]
    pub const fn end(&self) -> u32 {
        self.start + self.size
    }

    /// Block backing this allocation
    #[inline]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Same allocation with a different visible start
    pub(crate) const fn with_start(mut self, start: u32, short_lived: bool) -> Self {
        self.start = start;
        self.short_lived = short_lived;
        self
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Snapshot of an allocator's state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeapStatistics {
    /// Size of the address range
    pub total_size: u32,
    /// Elements currently allocated
    pub allocated_size: u32,
    /// Elements currently free
    pub free_size: u32,
    /// Largest free block
    pub largest_free_block: u32,
    /// Live allocations
    pub allocation_count: u32,
    /// Free blocks
    pub free_block_count: u32,
    /// End of the highest allocated block
    pub high_watermark: u32,
    /// `1 - largest_free_block / free_size`, zero when nothing is free
    pub fragmentation: f32,
}

// =============================================================================
// BLOCK
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Block {
    start: u32,
    end: u32,
    prev: Option<BlockId>,
    next: Option<BlockId>,
    prev_available: Option<BlockId>,
    next_available: Option<BlockId>,
    allocated: bool,
}

impl Block {
    #[inline]
    fn size(&self) -> u32 {
        self.end - self.start
    }
}

// =============================================================================
// BEST-FIT ALLOCATOR
// =============================================================================

/// Best-fit sub-allocator over `0..total_size`
#[derive(Debug)]
pub struct BestFitAllocator {
    id: u32,
    total_size: u32,
    blocks: SlotArena<Block>,
    first_block: BlockId,
    first_available: Option<BlockId>,
    allocated_size: u32,
    high_watermark: u32,
}

impl BestFitAllocator {
    /// Create an allocator with a single free block covering the range
    pub fn new(total_size: u32) -> Self {
        assert!(total_size > 0, "BestFitAllocator: empty address range");
        let mut blocks = SlotArena::new();
        let first_block = blocks.insert(Block {
            start: 0,
            end: total_size,
            prev: None,
            next: None,
            prev_available: None,
            next_available: None,
            allocated: false,
        });
        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            total_size,
            blocks,
            first_block,
            first_available: Some(first_block),
            allocated_size: 0,
            high_watermark: 0,
        }
    }

    /// Size of the address range
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Elements currently allocated
    pub fn allocated_size(&self) -> u32 {
        self.allocated_size
    }

    /// End of the highest allocated block, 0 when empty
    pub fn high_watermark(&self) -> u32 {
        self.high_watermark
    }

    /// Whether nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.high_watermark == 0
    }

    /// Allocate `size` elements
    ///
    /// Returns `None` for a zero size or when no free block is large enough.
    pub fn allocate(&mut self, size: u32) -> Option<Alloc> {
        if size == 0 {
            return None;
        }

        let id = self.find_best_fit(size)?;
        if self.block(id).size() > size {
            self.split(id, size);
        }
        self.unlink_available(id);

        let block = self.block_mut(id);
        block.allocated = true;
        let (start, end) = (block.start, block.end);

        self.allocated_size += size;
        self.high_watermark = self.high_watermark.max(end);

        Some(Alloc {
            start,
            size,
            short_lived: false,
            block: id,
            owner: self.id,
        })
    }

    /// Free an allocation
    ///
    /// # Panics
    ///
    /// Panics on a double free or an allocation from another allocator.
    pub fn free(&mut self, alloc: Alloc) {
        assert_eq!(
            alloc.owner, self.id,
            "BestFitAllocator: freeing an allocation from another allocator"
        );
        let Some(block) = self.blocks.get(alloc.block) else {
            panic!("BestFitAllocator: double free of {:?}", alloc);
        };
        assert!(block.allocated, "BestFitAllocator: double free of {:?}", alloc);
        assert!(
            block.start == alloc.start && block.size() == alloc.size,
            "BestFitAllocator: allocation {:?} does not match its block",
            alloc
        );

        let mut id = alloc.block;
        self.allocated_size -= alloc.size;
        self.block_mut(id).allocated = false;
        self.link_available(id);

        let block = *self.block(id);
        if let Some(next) = block.next {
            if !self.block(next).allocated {
                self.merge_with_next(id);
            }
        }
        if let Some(prev) = block.prev {
            if !self.block(prev).allocated {
                id = prev;
                self.merge_with_next(id);
            }
        }

        let merged = *self.block(id);
        if merged.end >= self.high_watermark {
            self.high_watermark = merged.start;
        }
    }

    /// Gather allocator statistics
    pub fn statistics(&self) -> HeapStatistics {
        let mut stats = HeapStatistics {
            total_size: self.total_size,
            allocated_size: self.allocated_size,
            high_watermark: self.high_watermark,
            ..HeapStatistics::default()
        };

        let mut cursor = Some(self.first_block);
        while let Some(id) = cursor {
            let block = self.block(id);
            if block.allocated {
                stats.allocation_count += 1;
            } else {
                stats.free_block_count += 1;
                stats.free_size += block.size();
                stats.largest_free_block = stats.largest_free_block.max(block.size());
            }
            cursor = block.next;
        }

        if stats.free_size > 0 {
            stats.fragmentation =
                1.0 - stats.largest_free_block as f32 / stats.free_size as f32;
        }
        stats
    }

    /// Validate the block structure
    ///
    /// Checks that the address list is gapless and covers the range, that the
    /// free list is the sorted set of free blocks, that no two free blocks are
    /// adjacent and that the counters match the blocks.
    pub fn check_integrity(&self) -> Result<(), &'static str> {
        let mut expected_start = 0;
        let mut prev: Option<BlockId> = None;
        let mut prev_free = false;
        let mut free_count = 0usize;
        let mut allocated = 0u32;
        let mut last_allocated_end = 0u32;
        let mut cursor = Some(self.first_block);

        while let Some(id) = cursor {
            let block = self.blocks.get(id).ok_or("dangling block link")?;
            if block.prev != prev {
                return Err("broken prev link");
            }
            if block.start != expected_start {
                return Err("gap or overlap in address list");
            }
            if block.end <= block.start {
                return Err("empty block");
            }
            if block.allocated {
                allocated += block.size();
                last_allocated_end = block.end;
                prev_free = false;
            } else {
                if prev_free {
                    return Err("adjacent free blocks");
                }
                free_count += 1;
                prev_free = true;
            }
            expected_start = block.end;
            prev = Some(id);
            cursor = block.next;
        }

        if expected_start != self.total_size {
            return Err("address list does not cover the range");
        }
        if allocated != self.allocated_size {
            return Err("allocated size out of sync");
        }
        if last_allocated_end != self.high_watermark {
            return Err("high watermark out of sync");
        }

        let mut listed = 0usize;
        let mut prev: Option<BlockId> = None;
        let mut prev_start: Option<u32> = None;
        let mut cursor = self.first_available;
        while let Some(id) = cursor {
            let block = self.blocks.get(id).ok_or("dangling free list link")?;
            if block.allocated {
                return Err("allocated block on free list");
            }
            if block.prev_available != prev {
                return Err("broken free list back link");
            }
            if prev_start.is_some_and(|s| s >= block.start) {
                return Err("free list out of order");
            }
            listed += 1;
            prev = Some(id);
            prev_start = Some(block.start);
            cursor = block.next_available;
        }

        if listed != free_count {
            return Err("free block missing from free list");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Block list plumbing
    // -------------------------------------------------------------------------

    fn block(&self, id: BlockId) -> &Block {
        match self.blocks.get(id) {
            Some(block) => block,
            None => panic!("BestFitAllocator: dangling block {:?}", id),
        }
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match self.blocks.get_mut(id) {
            Some(block) => block,
            None => panic!("BestFitAllocator: dangling block {:?}", id),
        }
    }

    // Smallest free block that fits; first one wins on ties
    fn find_best_fit(&self, size: u32) -> Option<BlockId> {
        let mut best: Option<(BlockId, u32)> = None;
        let mut cursor = self.first_available;
        while let Some(id) = cursor {
            let block = self.block(id);
            let block_size = block.size();
            if block_size >= size && best.map_or(true, |(_, best_size)| block_size < best_size) {
                best = Some((id, block_size));
                if block_size == size {
                    break;
                }
            }
            cursor = block.next_available;
        }
        best.map(|(id, _)| id)
    }

    // Cut `id` down to `size`; the remainder follows it in both lists
    fn split(&mut self, id: BlockId, size: u32) {
        let block = *self.block(id);
        let split_at = block.start + size;
        let tail = self.blocks.insert(Block {
            start: split_at,
            end: block.end,
            prev: Some(id),
            next: block.next,
            prev_available: Some(id),
            next_available: block.next_available,
            allocated: false,
        });
        if let Some(next) = block.next {
            self.block_mut(next).prev = Some(tail);
        }
        if let Some(next) = block.next_available {
            self.block_mut(next).prev_available = Some(tail);
        }
        let block = self.block_mut(id);
        block.end = split_at;
        block.next = Some(tail);
        block.next_available = Some(tail);
    }

    fn unlink_available(&mut self, id: BlockId) {
        let block = *self.block(id);
        match block.prev_available {
            Some(prev) => self.block_mut(prev).next_available = block.next_available,
            None => self.first_available = block.next_available,
        }
        if let Some(next) = block.next_available {
            self.block_mut(next).prev_available = block.prev_available;
        }
        let block = self.block_mut(id);
        block.prev_available = None;
        block.next_available = None;
    }

    // Address-ordered insert, linear scan
    fn link_available(&mut self, id: BlockId) {
        let start = self.block(id).start;
        let mut prev = None;
        let mut cursor = self.first_available;
        while let Some(candidate) = cursor {
            let block = self.block(candidate);
            if block.start > start {
                break;
            }
            prev = Some(candidate);
            cursor = block.next_available;
        }

        let block = self.block_mut(id);
        block.prev_available = prev;
        block.next_available = cursor;
        match prev {
            Some(prev) => self.block_mut(prev).next_available = Some(id),
            None => self.first_available = Some(id),
        }
        if let Some(next) = cursor {
            self.block_mut(next).prev_available = Some(id);
        }
    }

    // Absorb the free block following `id`; both must be on the free list
    fn merge_with_next(&mut self, id: BlockId) {
        let Some(next_id) = self.block(id).next else {
            return;
        };
        let Some(next) = self.blocks.remove(next_id) else {
            panic!("BestFitAllocator: dangling block {:?}", next_id);
        };
        debug_assert_eq!(next.prev_available, Some(id));

        if let Some(after) = next.next {
            self.block_mut(after).prev = Some(id);
        }
        if let Some(after) = next.next_available {
            self.block_mut(after).prev_available = Some(id);
        }
        let block = self.block_mut(id);
        block.end = next.end;
        block.next = next.next;
        block.next_available = next.next_available;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    // Small deterministic generator for randomised sequences
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) as u32
        }
    }

    fn assert_conserved(allocator: &BestFitAllocator) {
        assert_eq!(allocator.check_integrity(), Ok(()));
        let stats = allocator.statistics();
        assert_eq!(stats.allocated_size + stats.free_size, stats.total_size);
    }

    #[test]
    fn test_allocate_and_free_restores_single_block() {
        let mut allocator = BestFitAllocator::new(100);
        let a = allocator.allocate(30).unwrap();
        let b = allocator.allocate(20).unwrap();
        assert_eq!((a.start, a.size), (0, 30));
        assert_eq!((b.start, b.size), (30, 20));
        assert_eq!(allocator.high_watermark(), 50);

        allocator.free(a);
        assert_eq!(allocator.high_watermark(), 50);
        allocator.free(b);
        assert_eq!(allocator.high_watermark(), 0);
        assert!(allocator.is_empty());

        let stats = allocator.statistics();
        assert_eq!(stats.free_block_count, 1);
        assert_eq!(stats.largest_free_block, 100);
        assert_conserved(&allocator);
    }

    #[test]
    fn test_zero_size_and_exhaustion() {
        let mut allocator = BestFitAllocator::new(16);
        assert!(allocator.allocate(0).is_none());
        assert!(allocator.allocate(17).is_none());
        let all = allocator.allocate(16).unwrap();
        assert!(allocator.allocate(1).is_none());
        allocator.free(all);
        assert!(allocator.allocate(16).is_some());
    }

    #[test]
    fn test_best_fit_picks_smallest_hole() {
        let mut allocator = BestFitAllocator::new(100);
        let a = allocator.allocate(10).unwrap();
        let _b = allocator.allocate(10).unwrap();
        let c = allocator.allocate(4).unwrap();
        let _d = allocator.allocate(10).unwrap();
        allocator.free(a); // hole of 10 at 0
        allocator.free(c); // hole of 4 at 20

        let fit = allocator.allocate(4).unwrap();
        assert_eq!(fit.start, 20);
        let fit = allocator.allocate(6).unwrap();
        assert_eq!(fit.start, 0);
        assert_conserved(&allocator);
    }

    #[test]
    fn test_free_coalesces_both_sides() {
        let mut allocator = BestFitAllocator::new(60);
        let a = allocator.allocate(20).unwrap();
        let b = allocator.allocate(20).unwrap();
        let c = allocator.allocate(20).unwrap();
        allocator.free(a);
        allocator.free(c);
        assert_eq!(allocator.statistics().free_block_count, 2);
        assert_eq!(allocator.high_watermark(), 40);

        allocator.free(b);
        let stats = allocator.statistics();
        assert_eq!(stats.free_block_count, 1);
        assert_eq!(stats.largest_free_block, 60);
        assert_eq!(allocator.high_watermark(), 0);
        assert_conserved(&allocator);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let mut allocator = BestFitAllocator::new(32);
        let a = allocator.allocate(8).unwrap();
        let _b = allocator.allocate(8).unwrap();
        allocator.free(a);
        allocator.free(a);
    }

    #[test]
    #[should_panic(expected = "another allocator")]
    fn test_foreign_free_panics() {
        let mut first = BestFitAllocator::new(32);
        let mut second = BestFitAllocator::new(32);
        let a = first.allocate(8).unwrap();
        second.free(a);
    }

    #[test]
    fn test_random_sequence_conserves_space() {
        let mut rng = Lcg(0x5eed);
        let mut allocator = BestFitAllocator::new(4096);
        let mut live: Vec<Alloc> = Vec::new();

        for _ in 0..2000 {
            if live.is_empty() || rng.next() % 3 != 0 {
                let size = rng.next() % 96 + 1;
                if let Some(a) = allocator.allocate(size) {
                    assert_eq!(a.size, size);
                    assert!(a.end() <= 4096);
                    live.push(a);
                }
            } else {
                let index = rng.next() as usize % live.len();
                allocator.free(live.swap_remove(index));
            }
            assert_conserved(&allocator);
        }

        // Live allocations never overlap
        live.sort_by_key(|a| a.start);
        for pair in live.windows(2) {
            assert!(pair[0].end() <= pair[1].start);
        }

        for a in live.drain(..) {
            allocator.free(a);
        }
        let stats = allocator.statistics();
        assert_eq!(stats.free_block_count, 1);
        assert_eq!(stats.free_size, 4096);
        assert!(allocator.is_empty());
    }
}
