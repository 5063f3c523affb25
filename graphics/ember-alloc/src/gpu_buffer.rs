//! # Two-Ended GPU Buffer Allocator
//!
//! Long-lived allocations grow up from the bottom of the buffer, short-lived
//! ones grow down from the top. Both ends are [`BestFitAllocator`]s over the
//! same range; the high one hands out flipped addresses.
//!
//! ```text
//! 0                                                       total
//! [ long-lived ──────>          free          <────── short-lived ]
//!                  low.hw                   total - high.hw
//! ```

use crate::best_fit::{Alloc, BestFitAllocator, HeapStatistics};

/// Allocator for one GPU buffer shared by both lifetimes
#[derive(Debug)]
pub struct GpuBufferAllocator {
    low: BestFitAllocator,
    high: BestFitAllocator,
}

impl GpuBufferAllocator {
    /// Create an allocator for a buffer of `total_size` elements
    pub fn new(total_size: u32) -> Self {
        Self {
            low: BestFitAllocator::new(total_size),
            high: BestFitAllocator::new(total_size),
        }
    }

    /// Buffer size in elements
    pub fn total_size(&self) -> u32 {
        self.low.total_size()
    }

    /// Allocate `size` elements from the end matching `short_lived`
    ///
    /// Returns `None` when the two ends would overlap.
    pub fn allocate(&mut self, size: u32, short_lived: bool) -> Option<Alloc> {
        let total = self.total_size();
        let alloc = if short_lived {
            let alloc = self.high.allocate(size)?;
            alloc.with_start(total - alloc.start - size, true)
        } else {
            self.low.allocate(size)?
        };

        if self.low.high_watermark() + self.high.high_watermark() > total {
            self.free(alloc);
            return None;
        }
        Some(alloc)
    }

    /// Free an allocation from either end
    pub fn free(&mut self, alloc: Alloc) {
        if alloc.short_lived {
            let total = self.total_size();
            self.high
                .free(alloc.with_start(total - alloc.start - alloc.size, false));
        } else {
            self.low.free(alloc);
        }
    }

    /// Whether both ends are empty
    pub fn is_empty(&self) -> bool {
        self.low.is_empty() && self.high.is_empty()
    }

    /// Statistics of the long-lived end
    pub fn low_statistics(&self) -> HeapStatistics {
        self.low.statistics()
    }

    /// Statistics of the short-lived end, in flipped coordinates
    pub fn high_statistics(&self) -> HeapStatistics {
        self.high.statistics()
    }

    /// Validate both ends
    pub fn check_integrity(&self) -> Result<(), &'static str> {
        self.low.check_integrity()?;
        self.high.check_integrity()?;
        if self.low.high_watermark() + self.high.high_watermark() > self.total_size() {
            return Err("low and high allocations overlap");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_boundary() {
        let mut buffer = GpuBufferAllocator::new(100);
        let long = buffer.allocate(60, false).unwrap();
        let short = buffer.allocate(40, true).unwrap();
        assert_eq!((long.start, long.size), (0, 60));
        assert_eq!((short.start, short.size), (60, 40));
        assert!(short.short_lived);
        assert_eq!(buffer.check_integrity(), Ok(()));

        let mut buffer = GpuBufferAllocator::new(100);
        buffer.allocate(60, false).unwrap();
        assert!(buffer.allocate(41, true).is_none());
        // The failed attempt leaves the high end untouched
        assert!(buffer.high_statistics().high_watermark == 0);
        assert!(buffer.allocate(40, true).is_some());
    }

    #[test]
    fn test_short_lived_addresses_grow_down() {
        let mut buffer = GpuBufferAllocator::new(64);
        let a = buffer.allocate(8, true).unwrap();
        let b = buffer.allocate(8, true).unwrap();
        assert_eq!(a.start, 56);
        assert_eq!(b.start, 48);

        buffer.free(a);
        buffer.free(b);
        assert!(buffer.is_empty());
        assert_eq!(buffer.check_integrity(), Ok(()));
    }

    #[test]
    fn test_long_lived_collision_rolls_back() {
        let mut buffer = GpuBufferAllocator::new(32);
        let short = buffer.allocate(16, true).unwrap();
        assert!(buffer.allocate(17, false).is_none());
        assert!(buffer.low_statistics().allocated_size == 0);
        let long = buffer.allocate(16, false).unwrap();
        assert_eq!(long.end(), short.start);

        buffer.free(short);
        buffer.free(long);
        assert!(buffer.is_empty());
    }
}
