//! # Frame Synchronization
//!
//! CPU fences and per-frame work queues.
//!
//! The device keeps at most [`MAX_QUEUED_FRAME_COUNT`] frames of work in
//! flight. Anything the GPU may still read is parked in the [`FrameRing`]
//! slot of the frame that last used it, and that slot is only drained once
//! the fence recorded for the same frame has passed.

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Number of frames the GPU may lag behind the CPU
pub const MAX_QUEUED_FRAME_COUNT: usize = 4;

// =============================================================================
// FENCE ID
// =============================================================================

/// CPU fence marker returned by the backend
///
/// Values increase monotonically and may wrap around; zero is never a valid
/// fence.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FenceId(u32);

impl FenceId {
    /// Create a fence id from a raw value
    #[inline]
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Get the raw value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether `self` was inserted after `other`, accounting for wrap-around
    #[inline]
    pub const fn is_newer_than(self, other: FenceId) -> bool {
        (self.0.wrapping_sub(other.0) as i32) > 0
    }
}

impl fmt::Debug for FenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FenceId({})", self.0)
    }
}

// =============================================================================
// FRAME RING
// =============================================================================

/// Ring of per-frame queues keyed by frame index
///
/// Work pushed into the slot of frame `F` resolves when the frame counter
/// comes back around to the same slot, `MAX_QUEUED_FRAME_COUNT` frames later.
#[derive(Debug)]
pub struct FrameRing<T> {
    slots: Vec<T>,
}

impl<T: Default> FrameRing<T> {
    /// Create a ring with one default queue per in-flight frame
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_QUEUED_FRAME_COUNT);
        slots.resize_with(MAX_QUEUED_FRAME_COUNT, T::default);
        Self { slots }
    }

    /// Take the queue for `frame`, leaving an empty one behind
    pub fn take(&mut self, frame: u32) -> T {
        core::mem::take(self.slot_mut(frame))
    }
}

impl<T> FrameRing<T> {
    /// Slot index for a frame
    #[inline]
    pub const fn slot_index(frame: u32) -> usize {
        frame as usize % MAX_QUEUED_FRAME_COUNT
    }

    /// Frame at which work queued during `frame` resolves
    #[inline]
    pub const fn resolves_at(frame: u32) -> u32 {
        frame.wrapping_add(MAX_QUEUED_FRAME_COUNT as u32)
    }

    /// Queue for `frame`
    pub fn slot(&self, frame: u32) -> &T {
        &self.slots[Self::slot_index(frame)]
    }

    /// Mutable queue for `frame`
    pub fn slot_mut(&mut self, frame: u32) -> &mut T {
        &mut self.slots[Self::slot_index(frame)]
    }

    /// Put a queue back into the slot for `frame`
    pub fn restore(&mut self, frame: u32, queue: T) {
        *self.slot_mut(frame) = queue;
    }

    /// Iterate over all slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

impl<T: Default> Default for FrameRing<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// FRAME FENCES
// =============================================================================

/// Fence recorded for each in-flight frame slot
///
/// Recording is lock-free: a slot only ever moves forward to a newer fence,
/// so a late writer holding an older fence cannot roll it back.
#[derive(Debug)]
pub struct FrameFences {
    slots: [AtomicU32; MAX_QUEUED_FRAME_COUNT],
}

impl FrameFences {
    /// Create with no fences recorded
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicU32::new(0) }; MAX_QUEUED_FRAME_COUNT],
        }
    }

    /// Record `fence` for `frame` unless a newer one is already there
    pub fn record(&self, frame: u32, fence: FenceId) {
        let slot = &self.slots[FrameRing::<()>::slot_index(frame)];
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if let Some(existing) = FenceId::new(current) {
                if !fence.is_newer_than(existing) {
                    return;
                }
            }
            match slot.compare_exchange_weak(
                current,
                fence.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Fence recorded for `frame`, if any
    pub fn get(&self, frame: u32) -> Option<FenceId> {
        FenceId::new(self.slots[FrameRing::<()>::slot_index(frame)].load(Ordering::Acquire))
    }

    /// Clear and return the fence recorded for `frame`
    pub fn take(&self, frame: u32) -> Option<FenceId> {
        FenceId::new(self.slots[FrameRing::<()>::slot_index(frame)].swap(0, Ordering::AcqRel))
    }

    /// Newest fence across all slots
    pub fn latest(&self) -> Option<FenceId> {
        self.slots
            .iter()
            .filter_map(|slot| FenceId::new(slot.load(Ordering::Acquire)))
            .reduce(|a, b| if b.is_newer_than(a) { b } else { a })
    }
}

impl Default for FrameFences {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn fence(raw: u32) -> FenceId {
        FenceId::new(raw).unwrap()
    }

    #[test]
    fn test_fence_wraparound_ordering() {
        assert!(fence(2).is_newer_than(fence(1)));
        assert!(!fence(1).is_newer_than(fence(2)));
        assert!(fence(3).is_newer_than(fence(u32::MAX - 2)));
        assert!(!fence(5).is_newer_than(fence(5)));
        assert!(FenceId::new(0).is_none());
    }

    #[test]
    fn test_frame_fences_only_move_forward() {
        let fences = FrameFences::new();
        fences.record(1, fence(10));
        fences.record(1, fence(7));
        assert_eq!(fences.get(1), Some(fence(10)));
        fences.record(5, fence(12)); // same slot as frame 1
        assert_eq!(fences.get(1), Some(fence(12)));
        assert_eq!(fences.take(1), Some(fence(12)));
        assert_eq!(fences.get(1), None);
    }

    #[test]
    fn test_frame_fences_latest() {
        let fences = FrameFences::new();
        assert_eq!(fences.latest(), None);
        fences.record(0, fence(3));
        fences.record(2, fence(9));
        fences.record(3, fence(4));
        assert_eq!(fences.latest(), Some(fence(9)));
    }

    #[test]
    fn test_frame_ring_slots() {
        let mut ring: FrameRing<alloc::vec::Vec<u32>> = FrameRing::new();
        ring.slot_mut(1).push(7);
        assert_eq!(ring.slot(1 + MAX_QUEUED_FRAME_COUNT as u32), &vec![7]);
        assert_eq!(FrameRing::<()>::resolves_at(1), 1 + MAX_QUEUED_FRAME_COUNT as u32);
        let taken = ring.take(1);
        assert_eq!(taken, vec![7]);
        assert!(ring.slot(1).is_empty());
    }
}
