//! # EMBER GPU Backend
//!
//! The graphics API collaborator the render device drives.
//!
//! ## Call Groups
//!
//! ```text
//! GpuBackend
//!    │
//!    ├── Buffers        create / destroy / ranged upload
//!    ├── Drawing        batched indexed draw ranges
//!    ├── Fences         insert / poll / wait
//!    ├── Render state   scissor, viewport, view matrix, material, params
//!    ├── Targets        render textures, blits
//!    └── Resources      default textures and materials
//! ```
//!
//! Every method takes `&self`; implementations keep their own interior
//! state so a backend can be shared between the device and the resource
//! context.

pub mod mock;

use crate::sync::FenceId;
use crate::types::{BufferHandle, Mat4, MaterialId, RectInt, TextureId};
use crate::vertex::VertexLayout;

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Kind of GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Vertex buffer
    Vertex,
    /// 16-bit index buffer
    Index,
}

/// One dirty byte range inside an upload
///
/// `offset` is relative to the first byte of the upload window; the window
/// itself starts at the `min_byte` passed alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateRange {
    /// Offset from the start of the upload window
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

/// One indexed draw over a contiguous index span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawRange {
    /// First index in the index buffer
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
    /// Smallest vertex index referenced
    pub min_index_val: u32,
    /// Number of vertices referenced from `min_index_val`
    pub verts_referenced: u32,
}

/// Per-draw render state
///
/// A `None` material means "use the default material currently pushed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct StateParams {
    /// Material override
    pub material: Option<MaterialId>,
    /// Main texture
    pub texture: Option<TextureId>,
    /// Font atlas
    pub font: Option<TextureId>,
}

impl StateParams {
    /// Creates state with only a material set
    pub const fn with_material(material: MaterialId) -> Self {
        Self {
            material: Some(material),
            texture: None,
            font: None,
        }
    }

    /// Same state, different texture
    pub const fn texture(mut self, texture: TextureId) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Same state, different font atlas
    pub const fn font(mut self, font: TextureId) -> Self {
        self.font = Some(font);
        self
    }
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Graphics API used by the render device
pub trait GpuBackend: Send + Sync {
    /// Create a buffer of `element_count` elements of `element_size` bytes
    fn create_buffer(&self, kind: BufferKind, element_count: u32, element_size: u32)
        -> BufferHandle;

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Upload dirty ranges
    ///
    /// `data` holds bytes `min_byte..max_byte` of the CPU mirror; each range
    /// is written to `min_byte + range.offset` in the buffer.
    fn update_buffer_ranges(
        &self,
        buffer: BufferHandle,
        data: &[u8],
        ranges: &[UpdateRange],
        min_byte: u32,
        max_byte: u32,
    );

    /// Issue a batch of indexed draws sharing the same buffers and state
    fn draw_indexed_ranges(
        &self,
        index_buffer: BufferHandle,
        vertex_buffer: BufferHandle,
        ranges: &[DrawRange],
        layout: &VertexLayout,
    );

    /// Insert a CPU fence after all work issued so far
    fn insert_cpu_fence(&self) -> FenceId;

    /// Whether the GPU has passed `fence`
    fn cpu_fence_passed(&self, fence: FenceId) -> bool;

    /// Block until the GPU has passed `fence`
    fn wait_for_cpu_fence_passed(&self, fence: FenceId);

    /// Enable the scissor test with a pixel rect
    fn set_scissor_rect(&self, rect: RectInt);

    /// Disable the scissor test
    fn disable_scissor(&self);

    /// Viewport of the active render target in pixels
    fn active_viewport(&self) -> RectInt;

    /// Set the view transform
    fn set_view_matrix(&self, matrix: &Mat4);

    /// Bind a material, `None` for the built-in UI material
    fn bind_material(&self, material: Option<MaterialId>);

    /// Apply per-draw state (textures, font)
    fn apply_state_params(&self, params: &StateParams);

    /// Current render target, `None` for the back buffer
    fn active_render_target(&self) -> Option<TextureId>;

    /// Acquire a temporary render texture
    fn acquire_render_texture(&self, width: u32, height: u32) -> TextureId;

    /// Set the render target, `None` for the back buffer
    fn set_render_target(&self, target: Option<TextureId>);

    /// Clear the current render target
    fn clear_render_target(&self);

    /// Release a temporary render texture
    fn release_render_texture(&self, texture: TextureId);

    /// Copy `source` into `destination` through `material`
    fn blit(&self, source: TextureId, destination: Option<TextureId>, material: Option<MaterialId>);

    /// Create a texture from RGBA8 pixels
    fn create_texture(&self, width: u32, height: u32, pixels: &[u8]) -> TextureId;

    /// Destroy a texture
    fn destroy_texture(&self, texture: TextureId);

    /// Create a material from a named shader
    fn create_material(&self, shader: &str) -> MaterialId;

    /// Destroy a material
    fn destroy_material(&self, material: MaterialId);
}
