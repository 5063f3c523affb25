//! Device statistics

use alloc::vec::Vec;

use ember_alloc::HeapStatistics;
use ember_core::MAX_QUEUED_FRAME_COUNT;

use crate::page::PageId;

/// Counters for the frame being rendered
///
/// Reset by `on_frame_rendering_begin`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStatistics {
    /// Frame the counters belong to
    pub current_frame_index: u32,
    /// Indices submitted by draw commands
    pub total_indices: u32,
    /// Commands visited
    pub command_count: u32,
    /// Draw commands visited
    pub draw_command_count: u32,
    /// Material binds
    pub material_set_count: u32,
    /// Ranges stashed into the ring
    pub draw_range_count: u32,
    /// Backend draw calls
    pub draw_range_call_count: u32,
    /// Immediate callbacks run
    pub immediate_draws: u32,
    /// State param applications
    pub state_param_changes: u32,
}

/// Allocation state of one page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageStatistics {
    /// Page
    pub page: PageId,
    /// Dedicated to one large mesh
    pub dedicated: bool,
    /// Vertex capacity
    pub vertex_capacity: u32,
    /// Index capacity
    pub index_capacity: u32,
    /// Long-lived vertices
    pub vertices_low: HeapStatistics,
    /// Short-lived vertices
    pub vertices_high: HeapStatistics,
    /// Long-lived indices
    pub indices_low: HeapStatistics,
    /// Short-lived indices
    pub indices_high: HeapStatistics,
}

/// Allocation state of the whole device
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationStatistics {
    /// Pages in search order
    pub pages: Vec<PageStatistics>,
    /// Deferred frees queued per frame slot
    pub deferred_frees: [u32; MAX_QUEUED_FRAME_COUNT],
    /// Relocations queued per frame slot, active or superseded
    pub pending_updates: [u32; MAX_QUEUED_FRAME_COUNT],
}
