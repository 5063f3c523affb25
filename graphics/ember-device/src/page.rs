//! # Geometry Page
//!
//! A vertex data set and a 16-bit index data set allocated together.

use core::fmt;

use ember_core::{BufferHandle, BufferKind, GpuBackend, SlotKey, Vertex};

use crate::data_set::DataSet;

/// Identifies a page inside its device
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub(crate) SlotKey);

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({}v{})", self.0.index(), self.0.generation())
    }
}

/// Vertex and index storage for a group of meshes
#[derive(Debug)]
pub struct Page {
    /// Vertex storage
    pub vertices: DataSet<Vertex>,
    /// Index storage
    pub indices: DataSet<u16>,
    dedicated: bool,
    frames_empty: u32,
}

impl Page {
    /// Create a page and its GPU buffers
    pub fn new<B: GpuBackend + ?Sized>(
        backend: &B,
        vertex_capacity: u32,
        index_capacity: u32,
        pool_size: u32,
        dedicated: bool,
    ) -> Self {
        Self {
            vertices: DataSet::new(backend, BufferKind::Vertex, vertex_capacity, pool_size),
            indices: DataSet::new(backend, BufferKind::Index, index_capacity, pool_size),
            dedicated,
            frames_empty: 0,
        }
    }

    /// Whether the page serves a single large mesh
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    /// Whether nothing is allocated in either data set
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.indices.is_empty()
    }

    /// Count another frame of emptiness, returning the streak length
    pub(crate) fn tick_empty(&mut self) -> u32 {
        if self.is_empty() {
            self.frames_empty += 1;
        } else {
            self.frames_empty = 0;
        }
        self.frames_empty
    }

    /// Upload both data sets' dirty ranges
    pub fn send_updates<B: GpuBackend + ?Sized>(&mut self, backend: &B, frame: u32) -> u32 {
        self.vertices.send_updates(backend, frame) + self.indices.send_updates(backend, frame)
    }

    /// Index and vertex buffers, in draw order
    pub fn buffers(&self) -> (BufferHandle, BufferHandle) {
        (self.indices.buffer(), self.vertices.buffer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::MockBackend;

    #[test]
    fn test_page_empty_streak() {
        let backend = MockBackend::new();
        let mut page = Page::new(&backend, 64, 128, 4, false);
        assert_eq!(backend.counters().buffers_created, 2);
        assert_eq!(page.tick_empty(), 1);
        assert_eq!(page.tick_empty(), 2);

        let a = page.vertices.allocate(4, false).unwrap();
        assert!(!page.is_empty());
        assert_eq!(page.tick_empty(), 0);

        page.vertices.free(a);
        assert_eq!(page.tick_empty(), 1);
    }
}
