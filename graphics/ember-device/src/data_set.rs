//! # Data Set
//!
//! One GPU buffer, its CPU mirror, its sub-allocator and the dirty ranges
//! waiting to be uploaded.
//!
//! Dirty ranges are recorded into a ring of `pool_size * MAX_QUEUED_FRAME_COUNT`
//! descriptors. Each frame writes into its own batch of `pool_size` slots, so
//! descriptors handed to the backend stay untouched while the GPU may still
//! consume them. A batch that runs out of slots saturates: the whole dirty
//! span is then uploaded as a single range.

use alloc::vec;
use alloc::vec::Vec;

use bytemuck::Pod;
use ember_alloc::{Alloc, GpuBufferAllocator, HeapStatistics};
use ember_core::{BufferHandle, BufferKind, GpuBackend, UpdateRange, MAX_QUEUED_FRAME_COUNT};

/// GPU buffer with CPU mirror and pending uploads
#[derive(Debug)]
pub struct DataSet<T: Pod> {
    buffer: BufferHandle,
    cpu: Vec<T>,
    allocator: GpuBufferAllocator,
    update_ranges: Vec<UpdateRange>,
    pool_size: u32,
    batch_start: u32,
    enqueued: u32,
    range_min: u32,
    range_max: u32,
    saturated: bool,
    /// Frame of the last `send_updates`
    last_sent_frame: Option<u32>,
}

impl<T: Pod> DataSet<T> {
    const STRIDE: u32 = core::mem::size_of::<T>() as u32;

    /// Create the GPU buffer and an all-zero mirror
    pub fn new<B: GpuBackend + ?Sized>(
        backend: &B,
        kind: BufferKind,
        capacity: u32,
        pool_size: u32,
    ) -> Self {
        let buffer = backend.create_buffer(kind, capacity, Self::STRIDE);
        Self {
            buffer,
            cpu: vec![T::zeroed(); capacity as usize],
            allocator: GpuBufferAllocator::new(capacity),
            update_ranges: vec![UpdateRange::default(); (pool_size as usize) * MAX_QUEUED_FRAME_COUNT],
            pool_size,
            batch_start: 0,
            enqueued: 0,
            range_min: u32::MAX,
            range_max: 0,
            saturated: false,
            last_sent_frame: None,
        }
    }

    /// Backend buffer
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Capacity in elements
    pub fn capacity(&self) -> u32 {
        self.cpu.len() as u32
    }

    /// Allocate elements from the low or high end
    pub fn allocate(&mut self, size: u32, short_lived: bool) -> Option<Alloc> {
        self.allocator.allocate(size, short_lived)
    }

    /// Free elements
    pub fn free(&mut self, alloc: Alloc) {
        self.allocator.free(alloc);
    }

    /// Whether nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.allocator.is_empty()
    }

    /// Statistics of the long-lived end
    pub fn low_statistics(&self) -> HeapStatistics {
        self.allocator.low_statistics()
    }

    /// Statistics of the short-lived end
    pub fn high_statistics(&self) -> HeapStatistics {
        self.allocator.high_statistics()
    }

    /// Whole CPU mirror
    pub fn data(&self) -> &[T] {
        &self.cpu
    }

    /// Whole CPU mirror, mutable
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.cpu
    }

    /// Mirror of `len` elements from `start`
    pub fn slice(&self, start: u32, len: u32) -> &[T] {
        &self.cpu[start as usize..(start + len) as usize]
    }

    /// Mutable mirror of `len` elements from `start`
    pub fn slice_mut(&mut self, start: u32, len: u32) -> &mut [T] {
        &mut self.cpu[start as usize..(start + len) as usize]
    }

    /// Copy `len` elements from `src` to `dst` inside the mirror
    pub fn copy_within(&mut self, src: u32, len: u32, dst: u32) {
        let src = src as usize;
        self.cpu.copy_within(src..src + len as usize, dst as usize);
    }

    /// Whether this frame's batch overflowed
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    /// Ranges recorded for this frame
    pub fn pending_range_count(&self) -> u32 {
        self.enqueued
    }

    /// Mark `size` elements from `start` dirty
    pub fn register_update(&mut self, start: u32, size: u32) {
        debug_assert!(start + size <= self.capacity());
        if size == 0 {
            return;
        }

        let slot = (self.batch_start + self.enqueued) as usize;
        if self.enqueued > 0 {
            let last = &mut self.update_ranges[slot - 1];
            if last.offset + last.size == start * Self::STRIDE {
                last.size += size * Self::STRIDE;
                self.range_max = self.range_max.max(start + size);
                return;
            }
        }

        self.range_min = self.range_min.min(start);
        self.range_max = self.range_max.max(start + size);

        if self.enqueued == self.pool_size {
            self.saturated = true;
            return;
        }

        self.update_ranges[slot] = UpdateRange {
            offset: start * Self::STRIDE,
            size: size * Self::STRIDE,
        };
        self.enqueued += 1;
    }

    /// Hand this frame's dirty ranges to the backend and start a new batch
    ///
    /// Called at most once per frame; a second call would recycle range
    /// descriptors still in flight. Returns the number of ranges uploaded.
    pub fn send_updates<B: GpuBackend + ?Sized>(&mut self, backend: &B, frame: u32) -> u32 {
        debug_assert!(
            self.last_sent_frame != Some(frame),
            "DataSet: updates already sent for frame {}",
            frame
        );
        self.last_sent_frame = Some(frame);
        let start = self.batch_start as usize;

        if self.saturated {
            self.update_ranges[start] = UpdateRange {
                offset: self.range_min * Self::STRIDE,
                size: (self.range_max - self.range_min) * Self::STRIDE,
            };
            self.enqueued = 1;
        }

        let sent = self.enqueued;
        if sent > 0 {
            let min_byte = self.range_min * Self::STRIDE;
            let max_byte = self.range_max * Self::STRIDE;
            let batch = &mut self.update_ranges[start..start + sent as usize];
            for range in batch.iter_mut() {
                range.offset -= min_byte;
            }

            let window = &self.cpu[self.range_min as usize..self.range_max as usize];
            backend.update_buffer_ranges(
                self.buffer,
                bytemuck::cast_slice(window),
                batch,
                min_byte,
                max_byte,
            );
        }

        self.reset_update_state();
        sent
    }

    fn reset_update_state(&mut self) {
        self.range_min = u32::MAX;
        self.range_max = 0;
        self.saturated = false;
        self.enqueued = 0;
        self.batch_start += self.pool_size;
        if self.batch_start as usize >= self.update_ranges.len() {
            self.batch_start = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{MockBackend, Vertex};

    #[test]
    fn test_adjacent_updates_coalesce() {
        let backend = MockBackend::new();
        let mut set: DataSet<u16> = DataSet::new(&backend, BufferKind::Index, 64, 4);
        set.register_update(0, 4);
        set.register_update(4, 4);
        set.register_update(16, 2);
        assert_eq!(set.pending_range_count(), 2);

        assert_eq!(set.send_updates(&backend, 0), 2);
        let uploads = backend.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].min_byte, 0);
        assert_eq!(uploads[0].max_byte, 36);
        assert_eq!(
            uploads[0].ranges,
            alloc::vec![
                UpdateRange { offset: 0, size: 16 },
                UpdateRange { offset: 32, size: 4 },
            ]
        );
        assert_eq!(uploads[0].data_len, 36);
    }

    #[test]
    fn test_offsets_relative_to_window() {
        let backend = MockBackend::new();
        let mut set: DataSet<Vertex> = DataSet::new(&backend, BufferKind::Vertex, 32, 4);
        set.register_update(10, 2);
        set.register_update(20, 1);
        set.send_updates(&backend, 0);

        let upload = &backend.uploads()[0];
        assert_eq!(upload.min_byte, 360);
        assert_eq!(upload.max_byte, 21 * 36);
        assert_eq!(upload.ranges[0].offset, 0);
        assert_eq!(upload.ranges[1].offset, 10 * 36);
    }

    #[test]
    fn test_saturation_uploads_whole_span() {
        let backend = MockBackend::new();
        let mut set: DataSet<u16> = DataSet::new(&backend, BufferKind::Index, 256, 2);
        set.register_update(0, 1);
        set.register_update(10, 1);
        set.register_update(100, 1);
        assert!(set.is_saturated());

        assert_eq!(set.send_updates(&backend, 0), 1);
        let upload = &backend.uploads()[0];
        assert_eq!(upload.ranges, alloc::vec![UpdateRange { offset: 0, size: 202 }]);
        assert_eq!((upload.min_byte, upload.max_byte), (0, 202));
        assert!(!set.is_saturated());
    }

    #[test]
    fn test_empty_batch_sends_nothing() {
        let backend = MockBackend::new();
        let mut set: DataSet<u16> = DataSet::new(&backend, BufferKind::Index, 16, 2);
        let frames = (MAX_QUEUED_FRAME_COUNT * 2) as u32;
        for frame in 0..frames {
            assert_eq!(set.send_updates(&backend, frame), 0);
        }
        assert_eq!(backend.counters().buffer_uploads, 0);

        // Batches keep cycling through the ring
        set.register_update(3, 2);
        assert_eq!(set.send_updates(&backend, frames), 1);
    }

    #[test]
    #[should_panic(expected = "already sent for frame 7")]
    fn test_second_send_in_one_frame_panics() {
        let backend = MockBackend::new();
        let mut set: DataSet<u16> = DataSet::new(&backend, BufferKind::Index, 16, 2);
        set.register_update(0, 2);
        set.send_updates(&backend, 7);
        set.send_updates(&backend, 7);
    }
}
