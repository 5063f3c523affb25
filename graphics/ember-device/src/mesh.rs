//! # Mesh Records
//!
//! Owned mesh handles, the device-side record behind each handle, and the
//! deferred work that keeps GPU-visible regions stable.

use core::fmt;

use ember_alloc::Alloc;
use ember_core::{SlotKey, Vertex};

use crate::page::PageId;

// =============================================================================
// HANDLES
// =============================================================================

/// Copyable reference to a mesh, used by draw commands
///
/// A `MeshId` does not keep the mesh alive; commands naming a freed mesh are
/// skipped.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) SlotKey);

impl fmt::Debug for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MeshId({}v{})", self.0.index(), self.0.generation())
    }
}

/// Owning handle to a mesh
///
/// Not `Clone`: the mesh is released by passing the handle to
/// [`UiRenderDevice::free`](crate::UiRenderDevice::free).
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a dropped mesh handle leaks its geometry until the device is disposed"]
pub struct MeshHandle {
    id: MeshId,
}

impl MeshHandle {
    pub(crate) const fn new(id: MeshId) -> Self {
        Self { id }
    }

    /// Id for referencing the mesh from draw commands
    pub const fn id(&self) -> MeshId {
        self.id
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// Where a mesh currently lives
#[derive(Debug, Clone, Copy)]
pub(crate) struct MeshRecord {
    pub page: PageId,
    pub verts: Alloc,
    pub indices: Alloc,
    pub triangle_count: u32,
    pub alloc_time: u32,
    /// 1-based index into the update queue of `alloc_time`, 0 when none
    pub update_alloc_id: u32,
}

/// Region to release once the GPU is done with it
#[derive(Debug, Clone, Copy)]
pub(crate) struct AllocToFree {
    pub alloc: Alloc,
    pub page: PageId,
    pub vertices: bool,
}

/// Pending copy from a temporary region back to the permanent one
#[derive(Debug, Clone, Copy)]
pub(crate) struct AllocToUpdate {
    pub id: u32,
    pub alloc_time: u32,
    pub mesh: MeshId,
    pub perm_verts: Alloc,
    pub perm_indices: Alloc,
    pub perm_page: PageId,
    pub copy_back_indices: bool,
    pub active: bool,
}

// =============================================================================
// INSPECTION
// =============================================================================

/// Lifecycle state of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    /// Written this frame; updates and frees apply immediately
    Fresh,
    /// Possibly in use by the GPU; changes are deferred
    Stable,
    /// Served from a temporary region until the copy back
    Relocating,
}

/// Snapshot of a mesh's placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshInfo {
    /// Owning page
    pub page: PageId,
    /// First vertex in the page
    pub vertex_start: u32,
    /// Allocated vertices
    pub vertex_count: u32,
    /// First index in the page
    pub index_start: u32,
    /// Allocated indices
    pub index_count: u32,
    /// Value to add to mesh-local indices
    pub index_offset: u16,
    /// Triangles last written
    pub triangle_count: u32,
    /// Frame of the last allocation or relocation
    pub alloc_time: u32,
    /// Whether the current region is short-lived
    pub short_lived: bool,
}

/// Writable geometry returned by allocation and update
///
/// Indices are page-absolute: add `index_offset` to mesh-local indices.
#[derive(Debug)]
pub struct MeshWrite<'a> {
    /// Vertices to fill
    pub vertices: &'a mut [Vertex],
    /// Indices to fill
    pub indices: &'a mut [u16],
    /// First vertex of the region
    pub index_offset: u16,
}

impl MeshWrite<'_> {
    /// Write mesh-local indices, rebasing them onto the region
    pub fn write_local_indices(&mut self, local: &[u16]) {
        let offset = self.index_offset;
        for (dst, src) in self.indices.iter_mut().zip(local) {
            *dst = offset.wrapping_add(*src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_local_indices() {
        let mut vertices = [Vertex::default(); 3];
        let mut indices = [0u16; 3];
        let mut write = MeshWrite {
            vertices: &mut vertices,
            indices: &mut indices,
            index_offset: 100,
        };
        write.write_local_indices(&[0, 1, 2]);
        assert_eq!(indices, [100, 101, 102]);
    }
}
