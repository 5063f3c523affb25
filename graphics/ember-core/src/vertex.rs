//! UI vertex record and its input layout
//!
//! The field order and packing of [`Vertex`] is shared with the UI shader and
//! must not change.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// One UI vertex, 36 bytes
#[derive(Clone, Copy, Debug, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Position
    pub position: [f32; 3],
    /// Vertex color (RGBA, unorm8)
    pub tint: [u8; 4],
    /// Primary texture coordinates
    pub uv: [f32; 2],
    /// Transform, clip rect and opacity page coordinates
    pub xform_clip_pages: [u8; 4],
    /// Transform, clip rect and opacity ids
    pub ids: [u8; 4],
    /// Render type and per-vertex flags
    pub flags: [u8; 4],
}

const_assert_eq!(core::mem::size_of::<Vertex>(), 36);
const_assert_eq!(core::mem::align_of::<Vertex>(), 4);

impl Vertex {
    /// Input layout matching the record
    pub const LAYOUT: VertexLayout = VertexLayout {
        stride: 36,
        attributes: &[
            VertexAttribute::new(0, VertexFormat::Float32x3, 0),
            VertexAttribute::new(1, VertexFormat::Unorm8x4, 12),
            VertexAttribute::new(2, VertexFormat::Float32x2, 16),
            VertexAttribute::new(3, VertexFormat::Unorm8x4, 24),
            VertexAttribute::new(4, VertexFormat::Unorm8x4, 28),
            VertexAttribute::new(5, VertexFormat::Unorm8x4, 32),
        ],
    };

    /// Creates a vertex at `position` with a color, other fields zeroed
    pub const fn new(position: [f32; 3], tint: [u8; 4]) -> Self {
        Self {
            position,
            tint,
            uv: [0.0; 2],
            xform_clip_pages: [0; 4],
            ids: [0; 4],
            flags: [0; 4],
        }
    }
}

/// Vertex attribute format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum VertexFormat {
    /// 2x 32-bit float
    Float32x2 = 0,
    /// 3x 32-bit float
    Float32x3 = 1,
    /// 4x 8-bit unsigned normalized
    Unorm8x4 = 2,
}

impl VertexFormat {
    /// Size in bytes
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Unorm8x4 => 4,
        }
    }
}

/// Vertex attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Location in shader
    pub location: u32,
    /// Attribute format
    pub format: VertexFormat,
    /// Offset in bytes from start of vertex
    pub offset: u32,
}

impl VertexAttribute {
    /// Creates new attribute
    pub const fn new(location: u32, format: VertexFormat, offset: u32) -> Self {
        Self {
            location,
            format,
            offset,
        }
    }
}

/// Vertex input layout handed to the backend with every draw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    /// Stride in bytes
    pub stride: u32,
    /// Attributes in location order
    pub attributes: &'static [VertexAttribute],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_packed() {
        let layout = Vertex::LAYOUT;
        let mut expected_offset = 0;
        for attr in layout.attributes {
            assert_eq!(attr.offset, expected_offset);
            expected_offset += attr.format.size();
        }
        assert_eq!(expected_offset, layout.stride);
        assert_eq!(layout.stride as usize, core::mem::size_of::<Vertex>());
    }

    #[test]
    fn test_vertex_bytes() {
        let v = Vertex::new([1.0, 2.0, 3.0], [255, 0, 0, 255]);
        let bytes = bytemuck::bytes_of(&v);
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[12..16], &[255, 0, 0, 255]);
    }
}
