//! # UI Render Device
//!
//! Owns the geometry pages, hands out mesh regions and keeps every region
//! the GPU may still read untouched until the fence of its last use passes.
//!
//! ## Frame Model
//!
//! ```text
//! advance_frame ─> allocate / update / free ─> on_frame_rendering_begin ─> evaluate_chain
//!      │                                              (upload dirty ranges)    (draw, fence)
//!      └─ wait fence of frame F-k, run frees and copy-backs queued at F-k
//! ```
//!
//! A mesh written during the current frame is `Fresh` and can be changed in
//! place. Otherwise an update writes into a temporary short-lived region and
//! queues a copy back into the permanent region, performed
//! `MAX_QUEUED_FRAME_COUNT` frames later once the GPU is done with it.
//!
//! Within a frame, allocations, updates and frees must precede
//! `evaluate_chain`.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use ember_alloc::Alloc;
use ember_core::{
    BufferHandle, DrawRange, FrameFences, FrameRing, GpuBackend, Result, SlotArena, Vertex,
    MAX_QUEUED_FRAME_COUNT,
};

use crate::config::{DeviceConfig, DRAW_RANGE_RING_SIZE, MAX_VERTICES_PER_PAGE};
use crate::context::GraphicsResourceContext;
use crate::mesh::{
    AllocToFree, AllocToUpdate, MeshHandle, MeshId, MeshInfo, MeshRecord, MeshState, MeshWrite,
};
use crate::page::{Page, PageId};
use crate::stats::{AllocationStatistics, DrawStatistics, PageStatistics};

/// Retained-mode geometry store and draw submitter for UI meshes
pub struct UiRenderDevice<B: GpuBackend> {
    pub(crate) backend: Arc<B>,
    config: DeviceConfig,
    large_mesh_vertex_count: u32,
    index_to_vertex_ratio: f32,
    next_page_vertex_count: u32,
    created_first_page: bool,
    pub(crate) pages: SlotArena<Page>,
    /// Search order: normal pages newest first, dedicated pages at the tail
    page_order: Vec<PageId>,
    pub(crate) meshes: SlotArena<MeshRecord>,
    deferred_frees: FrameRing<Vec<AllocToFree>>,
    updates: FrameRing<Vec<AllocToUpdate>>,
    /// Buffers of pruned pages, destroyed once their frame's fence passes
    retired_buffers: FrameRing<Vec<BufferHandle>>,
    fences: FrameFences,
    frame: u32,
    pub(crate) draw_stats: DrawStatistics,
    pub(crate) draw_ranges: Vec<DrawRange>,
}

impl<B: GpuBackend> core::fmt::Debug for UiRenderDevice<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UiRenderDevice")
            .field("frame", &self.frame)
            .field("pages", &self.page_order.len())
            .field("meshes", &self.meshes.len())
            .finish()
    }
}

impl<B: GpuBackend> UiRenderDevice<B> {
    /// Create a device; pages are created on first use
    pub fn new(backend: Arc<B>, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let ratio = config.initial_index_capacity as f32 / config.initial_vertex_capacity as f32;
        log::debug!(
            "UiRenderDevice: created ({} vertices, {} indices initial)",
            config.initial_vertex_capacity,
            config.initial_index_capacity
        );
        Ok(Self {
            backend,
            large_mesh_vertex_count: config.large_mesh_threshold(),
            index_to_vertex_ratio: ratio.max(2.0),
            next_page_vertex_count: config.initial_vertex_capacity,
            created_first_page: false,
            config,
            pages: SlotArena::new(),
            page_order: Vec::new(),
            meshes: SlotArena::new(),
            deferred_frees: FrameRing::new(),
            updates: FrameRing::new(),
            retired_buffers: FrameRing::new(),
            fences: FrameFences::new(),
            frame: 0,
            draw_stats: DrawStatistics::default(),
            draw_ranges: vec![DrawRange::default(); DRAW_RANGE_RING_SIZE],
        })
    }

    /// Backend in use
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Configuration in use
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Current frame index
    pub fn frame_index(&self) -> u32 {
        self.frame
    }

    /// Number of pages
    pub fn page_count(&self) -> usize {
        self.page_order.len()
    }

    /// Number of live meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Counters for the frame being rendered
    pub fn draw_statistics(&self) -> DrawStatistics {
        self.draw_stats
    }

    // =========================================================================
    // ALLOCATION
    // =========================================================================

    /// Allocate a long-lived mesh
    ///
    /// Returns `None` when the counts are zero or cannot be placed.
    pub fn allocate(
        &mut self,
        vertex_count: u32,
        index_count: u32,
    ) -> Option<(MeshHandle, MeshWrite<'_>)> {
        self.allocate_mesh(vertex_count, index_count, false)
    }

    /// Allocate a mesh from the short-lived end of a page
    pub fn allocate_short_lived(
        &mut self,
        vertex_count: u32,
        index_count: u32,
    ) -> Option<(MeshHandle, MeshWrite<'_>)> {
        self.allocate_mesh(vertex_count, index_count, true)
    }

    fn allocate_mesh(
        &mut self,
        vertex_count: u32,
        index_count: u32,
        short_lived: bool,
    ) -> Option<(MeshHandle, MeshWrite<'_>)> {
        let Some((page_id, verts, indices)) =
            self.allocate_regions(vertex_count, index_count, short_lived)
        else {
            log::warn!(
                "UiRenderDevice: failed to allocate {} vertices / {} indices",
                vertex_count,
                index_count
            );
            return None;
        };

        let id = MeshId(self.meshes.insert(MeshRecord {
            page: page_id,
            verts,
            indices,
            triangle_count: index_count / 3,
            alloc_time: self.frame,
            update_alloc_id: 0,
        }));

        let page = self.page_mut(page_id);
        page.vertices.register_update(verts.start, verts.size);
        page.indices.register_update(indices.start, indices.size);
        let write = MeshWrite {
            vertices: page.vertices.slice_mut(verts.start, vertex_count),
            indices: page.indices.slice_mut(indices.start, index_count),
            index_offset: verts.start as u16,
        };
        Some((MeshHandle::new(id), write))
    }

    /// Place vertex and index regions, creating a page if needed
    fn allocate_regions(
        &mut self,
        vertex_count: u32,
        index_count: u32,
        short_lived: bool,
    ) -> Option<(PageId, Alloc, Alloc)> {
        if vertex_count == 0 || index_count == 0 {
            return None;
        }
        if vertex_count > MAX_VERTICES_PER_PAGE {
            log::warn!(
                "UiRenderDevice: mesh of {} vertices exceeds the {} vertex page limit",
                vertex_count,
                MAX_VERTICES_PER_PAGE
            );
            return None;
        }

        if vertex_count > self.large_mesh_vertex_count {
            return self.allocate_dedicated(vertex_count, index_count, short_lived);
        }

        for &page_id in &self.page_order {
            let Some(page) = self.pages.get_mut(page_id.0) else {
                continue;
            };
            if page.is_dedicated() {
                continue;
            }
            if let Some((verts, indices)) =
                try_alloc_from_page(page, vertex_count, index_count, short_lived)
            {
                return Some((page_id, verts, indices));
            }
        }

        loop {
            let grown = self.created_first_page;
            let page_id = self.create_normal_page(vertex_count, index_count);
            let page = self.page_mut(page_id);
            if let Some((verts, indices)) =
                try_alloc_from_page(page, vertex_count, index_count, short_lived)
            {
                return Some((page_id, verts, indices));
            }
            if grown {
                // A grown page always fits the mesh it was sized for
                return None;
            }
        }
    }

    fn create_normal_page(&mut self, vertex_count: u32, index_count: u32) -> PageId {
        let (vertex_capacity, index_capacity) = if self.created_first_page {
            let next = (self.next_page_vertex_count << 1)
                .max(vertex_count * 2)
                .min(MAX_VERTICES_PER_PAGE);
            self.next_page_vertex_count = next;
            let indices = ((next as f32 * self.index_to_vertex_ratio + 0.5) as u32)
                .max(index_count * 2);
            (next, indices)
        } else {
            self.created_first_page = true;
            (
                self.config.initial_vertex_capacity,
                self.config.initial_index_capacity,
            )
        };

        let page = Page::new(
            &*self.backend,
            vertex_capacity,
            index_capacity,
            self.config.update_range_pool_size,
            false,
        );
        let page_id = PageId(self.pages.insert(page));
        self.page_order.insert(0, page_id);
        log::debug!(
            "UiRenderDevice: new page {:?} ({} vertices, {} indices)",
            page_id,
            vertex_capacity,
            index_capacity
        );
        page_id
    }

    fn allocate_dedicated(
        &mut self,
        vertex_count: u32,
        index_count: u32,
        short_lived: bool,
    ) -> Option<(PageId, Alloc, Alloc)> {
        // Best-fitting empty dedicated page
        let mut best: Option<(PageId, u32)> = None;
        for &page_id in &self.page_order {
            let Some(page) = self.pages.get(page_id.0) else {
                continue;
            };
            let capacity = page.vertices.capacity();
            if page.is_dedicated()
                && page.is_empty()
                && capacity >= vertex_count
                && page.indices.capacity() >= index_count
                && best.map_or(true, |(_, c)| capacity < c)
            {
                best = Some((page_id, capacity));
            }
        }

        let page_id = match best {
            Some((page_id, _)) => page_id,
            None => {
                let page = Page::new(
                    &*self.backend,
                    vertex_count,
                    index_count,
                    self.config.update_range_pool_size,
                    true,
                );
                let page_id = PageId(self.pages.insert(page));
                self.page_order.push(page_id);
                log::debug!(
                    "UiRenderDevice: new dedicated page {:?} ({} vertices, {} indices)",
                    page_id,
                    vertex_count,
                    index_count
                );
                page_id
            }
        };

        let page = self.page_mut(page_id);
        let (verts, indices) = try_alloc_from_page(page, vertex_count, index_count, short_lived)?;
        Some((page_id, verts, indices))
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    /// Rewrite a mesh's vertices and indices
    ///
    /// A mesh allocated or relocated this frame is written in place. Any
    /// other mesh is moved to a temporary region and copied back once the
    /// GPU has finished with its permanent one. Returns `None`, leaving the
    /// mesh untouched, if no temporary region can be found.
    ///
    /// # Panics
    ///
    /// Panics if the counts exceed the mesh's current region.
    pub fn update(
        &mut self,
        mesh: &MeshHandle,
        vertex_count: u32,
        index_count: u32,
    ) -> Option<MeshWrite<'_>> {
        let id = mesh.id();
        let record = *self.record(id);
        assert!(
            vertex_count <= record.verts.size && index_count <= record.indices.size,
            "UiRenderDevice: update of {:?} grows it beyond its allocation",
            id
        );

        if record.alloc_time == self.frame {
            if record.update_alloc_id != 0 {
                self.active_update_mut(&record).copy_back_indices = true;
            }
        } else {
            self.relocate(id, vertex_count, index_count, true)?;
        }

        let record = *self.record(id);
        if let Some(current) = self.meshes.get_mut(id.0) {
            current.triangle_count = index_count / 3;
        }
        let page = self.page_mut(record.page);
        page.vertices.register_update(record.verts.start, vertex_count);
        page.indices.register_update(record.indices.start, index_count);
        Some(MeshWrite {
            vertices: page.vertices.slice_mut(record.verts.start, vertex_count),
            indices: page.indices.slice_mut(record.indices.start, index_count),
            index_offset: record.verts.start as u16,
        })
    }

    /// Rewrite only a mesh's vertices, keeping its indices
    ///
    /// # Panics
    ///
    /// Panics if `vertex_count` exceeds the mesh's current region.
    pub fn update_vertices(&mut self, mesh: &MeshHandle, vertex_count: u32) -> Option<&mut [Vertex]> {
        let id = mesh.id();
        let record = *self.record(id);
        assert!(
            vertex_count <= record.verts.size,
            "UiRenderDevice: update of {:?} grows it beyond its allocation",
            id
        );

        if record.alloc_time != self.frame {
            let old_page = record.page;
            let old_verts = record.verts;
            let old_indices = record.indices;
            self.relocate(id, vertex_count, old_indices.size, false)?;

            // Carry the indices over, rebased onto the new vertex region
            let moved = *self.record(id);
            let delta = moved.verts.start.wrapping_sub(old_verts.start) as u16;
            copy_indices(
                &mut self.pages,
                (old_page, old_indices.start),
                (moved.page, moved.indices.start),
                old_indices.size,
                delta,
            );
            self.page_mut(moved.page)
                .indices
                .register_update(moved.indices.start, old_indices.size);
        }

        let record = *self.record(id);
        let page = self.page_mut(record.page);
        page.vertices.register_update(record.verts.start, vertex_count);
        Some(page.vertices.slice_mut(record.verts.start, vertex_count))
    }

    /// Move a mesh into a temporary region and queue the copy back
    fn relocate(
        &mut self,
        id: MeshId,
        vertex_count: u32,
        index_count: u32,
        indices_changed: bool,
    ) -> Option<()> {
        let record = *self.record(id);

        let same_page = self
            .pages
            .get_mut(record.page.0)
            .and_then(|page| try_alloc_from_page(page, vertex_count, index_count, true));
        let (page, verts, indices) = match same_page {
            Some((verts, indices)) => (record.page, verts, indices),
            None => self.allocate_regions(vertex_count, index_count, true)?,
        };

        let mut perm = (record.page, record.verts, record.indices);
        let mut copy_back_indices = indices_changed;
        if record.update_alloc_id != 0 {
            // Supersede the pending copy back, inheriting its permanent region
            let previous = self.active_update_mut(&record);
            previous.active = false;
            perm = (previous.perm_page, previous.perm_verts, previous.perm_indices);
            copy_back_indices |= previous.copy_back_indices;

            let frees = self.deferred_frees.slot_mut(self.frame);
            frees.push(AllocToFree {
                alloc: record.verts,
                page: record.page,
                vertices: true,
            });
            frees.push(AllocToFree {
                alloc: record.indices,
                page: record.page,
                vertices: false,
            });
        }

        let frame = self.frame;
        let updates = self.updates.slot_mut(frame);
        let update_id = updates.len() as u32 + 1;
        updates.push(AllocToUpdate {
            id: update_id,
            alloc_time: frame,
            mesh: id,
            perm_verts: perm.1,
            perm_indices: perm.2,
            perm_page: perm.0,
            copy_back_indices,
            active: true,
        });

        let record = self.record_mut(id);
        record.page = page;
        record.verts = verts;
        record.indices = indices;
        record.alloc_time = frame;
        record.update_alloc_id = update_id;

        log::debug!(
            "UiRenderDevice: relocating {:?} to {:?} vertices {}..{}",
            id,
            page,
            verts.start,
            verts.end()
        );
        Some(())
    }

    // =========================================================================
    // FREE
    // =========================================================================

    /// Release a mesh
    ///
    /// Regions the GPU may still read are queued and released
    /// `MAX_QUEUED_FRAME_COUNT` frames later.
    pub fn free(&mut self, mesh: MeshHandle) {
        let id = mesh.id();
        let Some(record) = self.meshes.remove(id.0) else {
            panic!("UiRenderDevice: freeing unknown mesh {:?}", id);
        };

        if record.update_alloc_id != 0 {
            let update = self.active_update_mut(&record);
            update.active = false;
            let perm = (update.perm_page, update.perm_verts, update.perm_indices);
            let frees = self.deferred_frees.slot_mut(self.frame);
            frees.push(AllocToFree {
                alloc: record.verts,
                page: record.page,
                vertices: true,
            });
            frees.push(AllocToFree {
                alloc: record.indices,
                page: record.page,
                vertices: false,
            });
            frees.push(AllocToFree {
                alloc: perm.1,
                page: perm.0,
                vertices: true,
            });
            frees.push(AllocToFree {
                alloc: perm.2,
                page: perm.0,
                vertices: false,
            });
        } else if record.alloc_time == self.frame {
            let page = self.page_mut(record.page);
            page.vertices.free(record.verts);
            page.indices.free(record.indices);
        } else {
            let frees = self.deferred_frees.slot_mut(self.frame);
            frees.push(AllocToFree {
                alloc: record.verts,
                page: record.page,
                vertices: true,
            });
            frees.push(AllocToFree {
                alloc: record.indices,
                page: record.page,
                vertices: false,
            });
        }
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    /// Upload all dirty ranges and reset the draw counters
    pub fn on_frame_rendering_begin(&mut self) {
        self.draw_stats = DrawStatistics {
            current_frame_index: self.frame,
            ..DrawStatistics::default()
        };
        let mut ranges = 0;
        for &page_id in &self.page_order {
            if let Some(page) = self.pages.get_mut(page_id.0) {
                ranges += page.send_updates(&*self.backend, self.frame);
            }
        }
        log::trace!("UiRenderDevice: frame {} uploaded {} ranges", self.frame, ranges);
    }

    /// Record a fence after everything issued this frame
    pub fn update_fence_value(&self) {
        let fence = self.backend.insert_cpu_fence();
        self.fences.record(self.frame, fence);
    }

    /// Start the next frame
    ///
    /// Waits for the GPU to finish the frame that last used this frame's
    /// slot, then performs the frees and copy backs queued there.
    pub fn advance_frame(&mut self) {
        self.frame = self.frame.wrapping_add(1);
        let frame = self.frame;
        log::trace!("UiRenderDevice: advancing to frame {}", frame);

        if let Some(fence) = self.fences.take(frame) {
            if !self.backend.cpu_fence_passed(fence) {
                log::trace!("UiRenderDevice: waiting on {:?}", fence);
                self.backend.wait_for_cpu_fence_passed(fence);
            }
        }

        let mut frees = self.deferred_frees.take(frame);
        for free in frees.drain(..) {
            let page = self.page_mut(free.page);
            if free.vertices {
                page.vertices.free(free.alloc);
            } else {
                page.indices.free(free.alloc);
            }
        }
        self.deferred_frees.restore(frame, frees);

        let mut updates = self.updates.take(frame);
        for update in updates.drain(..) {
            self.copy_back(&update);
        }
        self.updates.restore(frame, updates);

        for buffer in self.retired_buffers.take(frame) {
            self.backend.destroy_buffer(buffer);
        }
        self.prune_empty_pages();
    }

    fn copy_back(&mut self, update: &AllocToUpdate) {
        if !update.active {
            return;
        }
        let Some(record) = self.meshes.get(update.mesh.0).copied() else {
            return;
        };
        if record.update_alloc_id != update.id || record.alloc_time != update.alloc_time {
            return;
        }

        let temp_verts = record.verts;
        let temp_indices = record.indices;
        copy_vertices(
            &mut self.pages,
            (record.page, temp_verts.start),
            (update.perm_page, update.perm_verts.start),
            temp_verts.size,
        );
        self.page_mut(update.perm_page)
            .vertices
            .register_update(update.perm_verts.start, temp_verts.size);

        if update.copy_back_indices {
            let delta = update.perm_verts.start.wrapping_sub(temp_verts.start) as u16;
            copy_indices(
                &mut self.pages,
                (record.page, temp_indices.start),
                (update.perm_page, update.perm_indices.start),
                temp_indices.size,
                delta,
            );
            self.page_mut(update.perm_page)
                .indices
                .register_update(update.perm_indices.start, temp_indices.size);
        }

        let frees = self.deferred_frees.slot_mut(self.frame);
        frees.push(AllocToFree {
            alloc: temp_verts,
            page: record.page,
            vertices: true,
        });
        frees.push(AllocToFree {
            alloc: temp_indices,
            page: record.page,
            vertices: false,
        });

        let frame = self.frame;
        let record = self.record_mut(update.mesh);
        record.page = update.perm_page;
        record.verts = update.perm_verts;
        record.indices = update.perm_indices;
        record.alloc_time = frame;
        record.update_alloc_id = 0;
    }

    fn prune_empty_pages(&mut self) {
        let limit = self.config.prune_empty_page_frame_count;
        let pages = &mut self.pages;
        let retired = self.retired_buffers.slot_mut(self.frame);
        self.page_order.retain(|&page_id| {
            let Some(page) = pages.get_mut(page_id.0) else {
                return false;
            };
            if page.tick_empty() < limit {
                return true;
            }
            if let Some(page) = pages.remove(page_id.0) {
                retired.push(page.vertices.buffer());
                retired.push(page.indices.buffer());
            }
            log::debug!("UiRenderDevice: pruned empty page {:?}", page_id);
            false
        });
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Placement of a mesh
    pub fn mesh_info(&self, mesh: &MeshHandle) -> MeshInfo {
        let record = self.record(mesh.id());
        MeshInfo {
            page: record.page,
            vertex_start: record.verts.start,
            vertex_count: record.verts.size,
            index_start: record.indices.start,
            index_count: record.indices.size,
            index_offset: record.verts.start as u16,
            triangle_count: record.triangle_count,
            alloc_time: record.alloc_time,
            short_lived: record.verts.short_lived,
        }
    }

    /// Lifecycle state of a mesh
    pub fn mesh_state(&self, mesh: &MeshHandle) -> MeshState {
        let record = self.record(mesh.id());
        if record.update_alloc_id != 0 {
            MeshState::Relocating
        } else if record.alloc_time == self.frame {
            MeshState::Fresh
        } else {
            MeshState::Stable
        }
    }

    /// CPU mirror of a mesh's current region
    pub fn mesh_data(&self, mesh: &MeshHandle) -> (&[Vertex], &[u16]) {
        let record = self.record(mesh.id());
        let page = self.page(record.page);
        (
            page.vertices.slice(record.verts.start, record.verts.size),
            page.indices.slice(record.indices.start, record.indices.size),
        )
    }

    /// Allocation state of every page and frame slot
    pub fn allocation_statistics(&self) -> AllocationStatistics {
        let pages = self
            .page_order
            .iter()
            .filter_map(|&page_id| {
                let page = self.pages.get(page_id.0)?;
                Some(PageStatistics {
                    page: page_id,
                    dedicated: page.is_dedicated(),
                    vertex_capacity: page.vertices.capacity(),
                    index_capacity: page.indices.capacity(),
                    vertices_low: page.vertices.low_statistics(),
                    vertices_high: page.vertices.high_statistics(),
                    indices_low: page.indices.low_statistics(),
                    indices_high: page.indices.high_statistics(),
                })
            })
            .collect();

        let mut deferred_frees = [0; MAX_QUEUED_FRAME_COUNT];
        let mut pending_updates = [0; MAX_QUEUED_FRAME_COUNT];
        for (slot, frees) in self.deferred_frees.iter().enumerate() {
            deferred_frees[slot] = frees.len() as u32;
        }
        for (slot, updates) in self.updates.iter().enumerate() {
            pending_updates[slot] = updates.len() as u32;
        }

        AllocationStatistics {
            pages,
            deferred_frees,
            pending_updates,
        }
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Hand every GPU buffer to the resource context
    ///
    /// The buffers are destroyed once the GPU passes a fence inserted now.
    pub fn dispose(mut self, context: &GraphicsResourceContext<B>) -> Result<()> {
        let mut buffers = Vec::with_capacity(self.page_order.len() * 2);
        for page_id in self.page_order.drain(..) {
            if let Some(page) = self.pages.remove(page_id.0) {
                buffers.push(page.vertices.buffer());
                buffers.push(page.indices.buffer());
            }
        }
        for frame in 0..MAX_QUEUED_FRAME_COUNT as u32 {
            buffers.append(&mut self.retired_buffers.take(frame));
        }
        log::debug!(
            "UiRenderDevice: disposing {} buffers, {} meshes outstanding",
            buffers.len(),
            self.meshes.len()
        );
        context.enqueue_disposal(buffers)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn record(&self, id: MeshId) -> &MeshRecord {
        match self.meshes.get(id.0) {
            Some(record) => record,
            None => panic!("UiRenderDevice: unknown mesh {:?}", id),
        }
    }

    fn record_mut(&mut self, id: MeshId) -> &mut MeshRecord {
        match self.meshes.get_mut(id.0) {
            Some(record) => record,
            None => panic!("UiRenderDevice: unknown mesh {:?}", id),
        }
    }

    fn page(&self, id: PageId) -> &Page {
        match self.pages.get(id.0) {
            Some(page) => page,
            None => panic!("UiRenderDevice: unknown page {:?}", id),
        }
    }

    fn page_mut(&mut self, id: PageId) -> &mut Page {
        match self.pages.get_mut(id.0) {
            Some(page) => page,
            None => panic!("UiRenderDevice: unknown page {:?}", id),
        }
    }

    /// Copy-back record a relocating mesh points at
    fn active_update_mut(&mut self, record: &MeshRecord) -> &mut AllocToUpdate {
        let index = record.update_alloc_id as usize - 1;
        let update = &mut self.updates.slot_mut(record.alloc_time)[index];
        assert!(
            update.active && update.id == record.update_alloc_id,
            "UiRenderDevice: relocation record out of sync"
        );
        update
    }
}

impl<B: GpuBackend> Drop for UiRenderDevice<B> {
    fn drop(&mut self) {
        if !self.page_order.is_empty() {
            log::warn!(
                "UiRenderDevice: dropped without dispose, leaking {} pages",
                self.page_order.len()
            );
        }
    }
}

/// Allocate vertices and indices from one page, or neither
fn try_alloc_from_page(
    page: &mut Page,
    vertex_count: u32,
    index_count: u32,
    short_lived: bool,
) -> Option<(Alloc, Alloc)> {
    let verts = page.vertices.allocate(vertex_count, short_lived)?;
    match page.indices.allocate(index_count, short_lived) {
        Some(indices) => Some((verts, indices)),
        None => {
            page.vertices.free(verts);
            None
        }
    }
}

fn copy_vertices(
    pages: &mut SlotArena<Page>,
    (src_page, src_start): (PageId, u32),
    (dst_page, dst_start): (PageId, u32),
    count: u32,
) {
    if src_page == dst_page {
        if let Some(page) = pages.get_mut(src_page.0) {
            page.vertices.copy_within(src_start, count, dst_start);
        }
    } else if let Some((src, dst)) = pages.get_pair_mut(src_page.0, dst_page.0) {
        dst.vertices
            .slice_mut(dst_start, count)
            .copy_from_slice(src.vertices.slice(src_start, count));
    }
}

/// Copy indices, adding `delta` (mod 2^16) to each
fn copy_indices(
    pages: &mut SlotArena<Page>,
    (src_page, src_start): (PageId, u32),
    (dst_page, dst_start): (PageId, u32),
    count: u32,
    delta: u16,
) {
    if src_page == dst_page {
        if let Some(page) = pages.get_mut(src_page.0) {
            page.indices.copy_within(src_start, count, dst_start);
            for index in page.indices.slice_mut(dst_start, count) {
                *index = index.wrapping_add(delta);
            }
        }
    } else if let Some((src, dst)) = pages.get_pair_mut(src_page.0, dst_page.0) {
        let source = src.indices.slice(src_start, count);
        for (dst, src) in dst.indices.slice_mut(dst_start, count).iter_mut().zip(source) {
            *dst = src.wrapping_add(delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::MockBackend;

    fn device(config: DeviceConfig) -> UiRenderDevice<MockBackend> {
        UiRenderDevice::new(Arc::new(MockBackend::new()), config).unwrap()
    }

    fn vertex(tag: f32) -> Vertex {
        Vertex::new([tag, 0.0, 0.0], [255; 4])
    }

    fn end_frame(device: &mut UiRenderDevice<MockBackend>) {
        device.on_frame_rendering_begin();
        device.update_fence_value();
        device.advance_frame();
    }

    #[test]
    fn test_allocate_writes_into_page() {
        let mut device = device(DeviceConfig::default());
        let (mesh, mut write) = device.allocate(4, 6).unwrap();
        assert_eq!(write.vertices.len(), 4);
        assert_eq!(write.indices.len(), 6);
        write.vertices[0] = vertex(1.0);
        write.write_local_indices(&[0, 1, 2, 2, 3, 0]);

        let info = device.mesh_info(&mesh);
        assert_eq!((info.vertex_start, info.vertex_count), (0, 4));
        assert_eq!(info.triangle_count, 2);
        assert!(!info.short_lived);
        assert_eq!(device.mesh_state(&mesh), MeshState::Fresh);

        let (vertices, indices) = device.mesh_data(&mesh);
        assert_eq!(vertices[0], vertex(1.0));
        assert_eq!(indices, &[0, 1, 2, 2, 3, 0]);
        assert_eq!(device.page_count(), 1);
        device.free(mesh);
    }

    #[test]
    fn test_zero_and_oversized_requests_fail() {
        let mut device = device(DeviceConfig::default());
        assert!(device.allocate(0, 3).is_none());
        assert!(device.allocate(3, 0).is_none());
        assert!(device.allocate(MAX_VERTICES_PER_PAGE + 1, 3).is_none());
        assert_eq!(device.page_count(), 0);
    }

    #[test]
    fn test_same_frame_update_keeps_address() {
        let mut device = device(DeviceConfig::default());
        let (mesh, _) = device.allocate(8, 12).unwrap();
        let before = device.mesh_info(&mesh);

        let write = device.update(&mesh, 8, 12).unwrap();
        write.vertices[7] = vertex(7.0);
        let after = device.mesh_info(&mesh);
        assert_eq!(before.vertex_start, after.vertex_start);
        assert_eq!(before.index_start, after.index_start);
        assert_eq!(device.mesh_state(&mesh), MeshState::Fresh);
        assert_eq!(device.allocation_statistics().pending_updates, [0; 4]);
    }

    #[test]
    fn test_later_frame_update_relocates_and_copies_back() {
        let mut device = device(DeviceConfig::default());
        let (mesh, mut write) = device.allocate(4, 6).unwrap();
        write.vertices.fill(vertex(1.0));
        write.write_local_indices(&[0, 1, 2, 2, 3, 0]);
        let perm = device.mesh_info(&mesh);
        end_frame(&mut device);
        assert_eq!(device.mesh_state(&mesh), MeshState::Stable);

        // Frame 1: relocation into the short-lived end
        let mut write = device.update(&mesh, 4, 6).unwrap();
        write.vertices.fill(vertex(2.0));
        write.write_local_indices(&[3, 2, 1, 1, 0, 3]);
        let temp = device.mesh_info(&mesh);
        assert!(temp.short_lived);
        assert_ne!(temp.vertex_start, perm.vertex_start);
        assert_eq!(temp.page, perm.page);
        assert_eq!(device.mesh_state(&mesh), MeshState::Relocating);

        for _ in 0..MAX_QUEUED_FRAME_COUNT {
            assert_eq!(device.mesh_state(&mesh), MeshState::Relocating);
            end_frame(&mut device);
        }

        // Back in the permanent region with the new content
        let info = device.mesh_info(&mesh);
        assert_eq!(info.vertex_start, perm.vertex_start);
        assert_eq!(info.index_start, perm.index_start);
        assert!(!info.short_lived);
        let (vertices, indices) = device.mesh_data(&mesh);
        assert!(vertices.iter().all(|v| *v == vertex(2.0)));
        let base = perm.vertex_start as u16;
        assert_eq!(indices, &[base + 3, base + 2, base + 1, base + 1, base, base + 3]);

        // The temporary region is reclaimed one frame window later
        let high = |d: &UiRenderDevice<MockBackend>| {
            d.allocation_statistics().pages[0].vertices_high.allocated_size
        };
        assert_eq!(high(&device), 4);
        for _ in 0..MAX_QUEUED_FRAME_COUNT {
            end_frame(&mut device);
        }
        assert_eq!(high(&device), 0);
        assert!(device.backend().counters().fence_waits > 0);
        device.free(mesh);
    }

    #[test]
    fn test_reupdate_supersedes_pending_copy_back() {
        let mut device = device(DeviceConfig::default());
        let (mesh, _) = device.allocate(4, 6).unwrap();
        let perm = device.mesh_info(&mesh);
        end_frame(&mut device);

        device.update(&mesh, 4, 6).unwrap();
        let first_temp = device.mesh_info(&mesh);
        end_frame(&mut device);

        let write = device.update(&mesh, 4, 6).unwrap();
        write.vertices.fill(vertex(9.0));
        let second_temp = device.mesh_info(&mesh);
        assert_ne!(first_temp.vertex_start, second_temp.vertex_start);
        let stats = device.allocation_statistics();
        // First temp region queued for release in this frame's slot
        assert_eq!(stats.deferred_frees[FrameRing::<()>::slot_index(2)], 2);

        // Only the second copy back lands
        for _ in 0..MAX_QUEUED_FRAME_COUNT {
            end_frame(&mut device);
        }
        let info = device.mesh_info(&mesh);
        assert_eq!(info.vertex_start, perm.vertex_start);
        assert_eq!(device.mesh_state(&mesh), MeshState::Fresh);
        assert!(device.mesh_data(&mesh).0.iter().all(|v| *v == vertex(9.0)));
        device.free(mesh);
    }

    #[test]
    fn test_vertex_only_update_rebases_indices() {
        let mut device = device(DeviceConfig::default());
        let (_pad, _) = device.allocate(10, 3).unwrap();
        let (mesh, mut write) = device.allocate(3, 3).unwrap();
        write.write_local_indices(&[0, 1, 2]);
        end_frame(&mut device);

        let vertices = device.update_vertices(&mesh, 3).unwrap();
        vertices.fill(vertex(5.0));
        let info = device.mesh_info(&mesh);
        let (_, indices) = device.mesh_data(&mesh);
        let base = info.vertex_start as u16;
        assert_eq!(indices, &[base, base + 1, base + 2]);
    }

    #[test]
    fn test_free_fresh_is_immediate_and_stable_is_deferred() {
        let mut device = device(DeviceConfig::default());
        let (fresh, _) = device.allocate(4, 6).unwrap();
        device.free(fresh);
        assert!(device.allocation_statistics().pages[0].vertices_low.allocated_size == 0);

        let (stable, _) = device.allocate(4, 6).unwrap();
        end_frame(&mut device);
        device.free(stable);
        let stats = device.allocation_statistics();
        assert_eq!(stats.pages[0].vertices_low.allocated_size, 4);
        assert_eq!(stats.deferred_frees.iter().sum::<u32>(), 2);

        for _ in 1..MAX_QUEUED_FRAME_COUNT {
            end_frame(&mut device);
        }
        // Still in flight one frame short of the queue depth
        assert_eq!(device.allocation_statistics().pages[0].vertices_low.allocated_size, 4);
        end_frame(&mut device);
        assert_eq!(device.allocation_statistics().pages[0].vertices_low.allocated_size, 0);
    }

    #[test]
    fn test_free_relocating_releases_both_regions() {
        let mut device = device(DeviceConfig::default());
        let (mesh, _) = device.allocate(4, 6).unwrap();
        end_frame(&mut device);
        device.update(&mesh, 4, 6).unwrap();
        device.free(mesh);
        assert_eq!(device.mesh_count(), 0);

        for _ in 0..MAX_QUEUED_FRAME_COUNT {
            end_frame(&mut device);
        }
        let page = &device.allocation_statistics().pages[0];
        assert_eq!(page.vertices_low.allocated_size, 0);
        assert_eq!(page.vertices_high.allocated_size, 0);
        assert_eq!(page.indices_low.allocated_size, 0);
        assert_eq!(page.indices_high.allocated_size, 0);
    }

    #[test]
    fn test_second_page_created_on_collision() {
        let config = DeviceConfig::new().with_initial_capacity(4096, 8192);
        let mut device = device(config);

        let (long, _) = device.allocate(3000, 4500).unwrap();
        let (short, _) = device.allocate_short_lived(2000, 3000).unwrap();
        assert_eq!(device.page_count(), 2);

        let long_info = device.mesh_info(&long);
        let short_info = device.mesh_info(&short);
        assert_ne!(long_info.page, short_info.page);
        assert!(short_info.short_lived);

        let stats = device.allocation_statistics();
        // Newest normal page is searched first
        assert_eq!(stats.pages[0].page, short_info.page);
        assert_eq!(stats.pages[0].vertex_capacity, 8192);
        assert_eq!(stats.pages[0].index_capacity, 16384);
        assert_eq!(stats.pages[1].vertex_capacity, 4096);
        assert_eq!(short_info.vertex_start, 8192 - 2000);
        assert_eq!(long_info.vertex_start, 0);

        device.free(long);
        device.free(short);
    }

    #[test]
    fn test_large_mesh_gets_dedicated_page() {
        let config = DeviceConfig::new().with_initial_capacity(1024, 2048);
        let mut device = device(config);
        let (small, _) = device.allocate(16, 24).unwrap();
        let (large, _) = device.allocate(5000, 6000).unwrap();

        let stats = device.allocation_statistics();
        assert_eq!(stats.pages.len(), 2);
        let last = stats.pages.last().unwrap();
        assert!(last.dedicated);
        assert_eq!((last.vertex_capacity, last.index_capacity), (5000, 6000));

        // Small meshes never land on the dedicated page
        let (other, _) = device.allocate(16, 24).unwrap();
        assert_eq!(device.mesh_info(&other).page, device.mesh_info(&small).page);

        // A freed dedicated page is reused by the next large mesh that fits
        let dedicated = device.mesh_info(&large).page;
        device.free(large);
        let (again, _) = device.allocate(4000, 5000).unwrap();
        assert_eq!(device.mesh_info(&again).page, dedicated);
        assert_eq!(device.page_count(), 2);

        device.free(small);
        device.free(other);
        device.free(again);
    }

    #[test]
    fn test_empty_pages_are_pruned() {
        let config = DeviceConfig::new().with_prune_empty_page_frame_count(3);
        let mut device = device(config);
        let (mesh, _) = device.allocate(4, 6).unwrap();
        device.free(mesh);
        assert_eq!(device.page_count(), 1);

        for _ in 0..2 {
            end_frame(&mut device);
        }
        assert_eq!(device.page_count(), 1);
        end_frame(&mut device);
        assert_eq!(device.page_count(), 0);

        // Buffers outlive the page until the pruning frame's fence passes
        for _ in 1..MAX_QUEUED_FRAME_COUNT {
            end_frame(&mut device);
            assert_eq!(device.backend().live_buffers().len(), 2);
        }
        end_frame(&mut device);
        assert!(device.backend().live_buffers().is_empty());

        // Allocation after pruning starts a new page
        let (mesh, _) = device.allocate(4, 6).unwrap();
        assert_eq!(device.page_count(), 1);
        device.free(mesh);
    }

    #[test]
    fn test_updates_reach_backend_on_rendering_begin() {
        let mut device = device(DeviceConfig::default());
        let (mesh, _) = device.allocate(4, 6).unwrap();
        device.on_frame_rendering_begin();
        let uploads = device.backend().uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].max_byte, 4 * 36);
        assert_eq!(uploads[1].max_byte, 6 * 2);
        device.free(mesh);
    }

    #[test]
    #[should_panic(expected = "beyond its allocation")]
    fn test_update_cannot_grow() {
        let mut device = device(DeviceConfig::default());
        let (mesh, _) = device.allocate(4, 6).unwrap();
        let _ = device.update(&mesh, 5, 6);
    }
}
