//! Headless backend
//!
//! Records every call instead of talking to a GPU. Fences never complete on
//! their own: they pass when waited on or when the owner completes them,
//! which lets callers observe exactly when the device blocks.

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use super::{BufferKind, DrawRange, GpuBackend, StateParams, UpdateRange};
use crate::sync::FenceId;
use crate::types::{BufferHandle, Mat4, MaterialId, RectInt, TextureId, IDENTITY};
use crate::vertex::VertexLayout;

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCounters {
    /// Buffers created
    pub buffers_created: u32,
    /// Buffers destroyed
    pub buffers_destroyed: u32,
    /// `update_buffer_ranges` calls
    pub buffer_uploads: u32,
    /// `draw_indexed_ranges` calls
    pub draw_calls: u32,
    /// Ranges across all draw calls
    pub draw_ranges: u32,
    /// Fences inserted
    pub fences_inserted: u32,
    /// Blocking fence waits that had to wait
    pub fence_waits: u32,
    /// Scissor enables
    pub scissor_sets: u32,
    /// Scissor disables
    pub scissor_disables: u32,
    /// View matrix changes
    pub view_matrix_sets: u32,
    /// Material binds
    pub material_binds: u32,
    /// State param applications
    pub state_params_applied: u32,
    /// Render target switches
    pub render_target_sets: u32,
    /// Render target clears
    pub render_target_clears: u32,
    /// Render textures acquired
    pub render_textures_acquired: u32,
    /// Render textures released
    pub render_textures_released: u32,
    /// Blits
    pub blits: u32,
    /// Textures created
    pub textures_created: u32,
    /// Textures destroyed
    pub textures_destroyed: u32,
    /// Materials created
    pub materials_created: u32,
    /// Materials destroyed
    pub materials_destroyed: u32,
}

/// A recorded draw call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDraw {
    /// Index buffer
    pub index_buffer: BufferHandle,
    /// Vertex buffer
    pub vertex_buffer: BufferHandle,
    /// Ranges in issue order
    pub ranges: Vec<DrawRange>,
    /// Material bound at the time
    pub material: Option<MaterialId>,
    /// State params applied at the time
    pub params: Option<StateParams>,
    /// Scissor rect active at the time
    pub scissor: Option<RectInt>,
    /// Render target active at the time
    pub target: Option<TextureId>,
}

/// A recorded buffer upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUpload {
    /// Destination buffer
    pub buffer: BufferHandle,
    /// Dirty ranges, relative to `min_byte`
    pub ranges: Vec<UpdateRange>,
    /// First byte of the upload window
    pub min_byte: u32,
    /// End of the upload window
    pub max_byte: u32,
    /// Length of the data slice handed over
    pub data_len: usize,
}

#[derive(Debug)]
struct MockState {
    counters: MockCounters,
    draws: Vec<MockDraw>,
    uploads: Vec<MockUpload>,
    live_buffers: Vec<(BufferHandle, BufferKind, u32)>,
    next_id: u32,
    last_fence: u32,
    completed_fence: u32,
    viewport: RectInt,
    scissor: Option<RectInt>,
    view_matrix: Mat4,
    material: Option<MaterialId>,
    params: Option<StateParams>,
    target: Option<TextureId>,
    live_render_textures: Vec<TextureId>,
    material_names: Vec<(MaterialId, String)>,
}

/// Backend that records calls and performs no GPU work
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    /// Creates a mock with a 1920x1080 viewport
    pub fn new() -> Self {
        Self::with_viewport(RectInt::new(0, 0, 1920, 1080))
    }

    /// Creates a mock with a given viewport
    pub fn with_viewport(viewport: RectInt) -> Self {
        Self {
            state: Mutex::new(MockState {
                counters: MockCounters::default(),
                draws: Vec::new(),
                uploads: Vec::new(),
                live_buffers: Vec::new(),
                next_id: 1,
                last_fence: 0,
                completed_fence: 0,
                viewport,
                scissor: None,
                view_matrix: IDENTITY,
                material: None,
                params: None,
                target: None,
                live_render_textures: Vec::new(),
                material_names: Vec::new(),
            }),
        }
    }

    /// Snapshot of the call counters
    pub fn counters(&self) -> MockCounters {
        self.state.lock().counters
    }

    /// Recorded draws
    pub fn draws(&self) -> Vec<MockDraw> {
        self.state.lock().draws.clone()
    }

    /// Recorded uploads
    pub fn uploads(&self) -> Vec<MockUpload> {
        self.state.lock().uploads.clone()
    }

    /// Forget recorded draws, uploads and counters
    pub fn clear_recorded(&self) {
        let mut state = self.state.lock();
        state.counters = MockCounters::default();
        state.draws.clear();
        state.uploads.clear();
    }

    /// Change the reported viewport
    pub fn set_viewport(&self, viewport: RectInt) {
        self.state.lock().viewport = viewport;
    }

    /// Mark every fence up to and including `fence` as passed
    pub fn complete_fence(&self, fence: FenceId) {
        let mut state = self.state.lock();
        let completed = FenceId::new(state.completed_fence);
        if completed.map_or(true, |c| fence.is_newer_than(c)) {
            state.completed_fence = fence.raw();
        }
    }

    /// Mark every inserted fence as passed
    pub fn complete_all_fences(&self) {
        let mut state = self.state.lock();
        state.completed_fence = state.last_fence;
    }

    /// Most recently inserted fence
    pub fn last_fence(&self) -> Option<FenceId> {
        FenceId::new(self.state.lock().last_fence)
    }

    /// Buffers created and not yet destroyed
    pub fn live_buffers(&self) -> Vec<(BufferHandle, BufferKind, u32)> {
        self.state.lock().live_buffers.clone()
    }

    /// Render textures acquired and not yet released
    pub fn live_render_texture_count(&self) -> usize {
        self.state.lock().live_render_textures.len()
    }

    /// Active scissor rect, `None` when disabled
    pub fn scissor(&self) -> Option<RectInt> {
        self.state.lock().scissor
    }

    /// Current view matrix
    pub fn view_matrix(&self) -> Mat4 {
        self.state.lock().view_matrix
    }

    /// Shader name a material was created from
    pub fn material_shader(&self, material: MaterialId) -> Option<String> {
        self.state
            .lock()
            .material_names
            .iter()
            .find(|(id, _)| *id == material)
            .map(|(_, name)| name.clone())
    }

    fn fence_passed(state: &MockState, fence: FenceId) -> bool {
        match FenceId::new(state.completed_fence) {
            Some(completed) => !fence.is_newer_than(completed),
            None => false,
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GpuBackend for MockBackend {
    fn create_buffer(
        &self,
        kind: BufferKind,
        element_count: u32,
        _element_size: u32,
    ) -> BufferHandle {
        let mut state = self.state.lock();
        let handle = BufferHandle(state.next_id());
        state.counters.buffers_created += 1;
        state.live_buffers.push((handle, kind, element_count));
        handle
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        let before = state.live_buffers.len();
        state.live_buffers.retain(|(handle, _, _)| *handle != buffer);
        assert!(
            state.live_buffers.len() < before,
            "MockBackend: destroying unknown buffer {:?}",
            buffer
        );
        state.counters.buffers_destroyed += 1;
    }

    fn update_buffer_ranges(
        &self,
        buffer: BufferHandle,
        data: &[u8],
        ranges: &[UpdateRange],
        min_byte: u32,
        max_byte: u32,
    ) {
        debug_assert_eq!(data.len(), (max_byte - min_byte) as usize);
        let mut state = self.state.lock();
        state.counters.buffer_uploads += 1;
        state.uploads.push(MockUpload {
            buffer,
            ranges: ranges.to_vec(),
            min_byte,
            max_byte,
            data_len: data.len(),
        });
    }

    fn draw_indexed_ranges(
        &self,
        index_buffer: BufferHandle,
        vertex_buffer: BufferHandle,
        ranges: &[DrawRange],
        _layout: &VertexLayout,
    ) {
        let mut state = self.state.lock();
        state.counters.draw_calls += 1;
        state.counters.draw_ranges += ranges.len() as u32;
        let draw = MockDraw {
            index_buffer,
            vertex_buffer,
            ranges: ranges.to_vec(),
            material: state.material,
            params: state.params,
            scissor: state.scissor,
            target: state.target,
        };
        state.draws.push(draw);
    }

    fn insert_cpu_fence(&self) -> FenceId {
        let mut state = self.state.lock();
        state.counters.fences_inserted += 1;
        // Zero is skipped on wrap
        loop {
            state.last_fence = state.last_fence.wrapping_add(1);
            if let Some(fence) = FenceId::new(state.last_fence) {
                return fence;
            }
        }
    }

    fn cpu_fence_passed(&self, fence: FenceId) -> bool {
        Self::fence_passed(&self.state.lock(), fence)
    }

    fn wait_for_cpu_fence_passed(&self, fence: FenceId) {
        let mut state = self.state.lock();
        if !Self::fence_passed(&state, fence) {
            state.counters.fence_waits += 1;
            state.completed_fence = fence.raw();
        }
    }

    fn set_scissor_rect(&self, rect: RectInt) {
        let mut state = self.state.lock();
        state.counters.scissor_sets += 1;
        state.scissor = Some(rect);
    }

    fn disable_scissor(&self) {
        let mut state = self.state.lock();
        state.counters.scissor_disables += 1;
        state.scissor = None;
    }

    fn active_viewport(&self) -> RectInt {
        self.state.lock().viewport
    }

    fn set_view_matrix(&self, matrix: &Mat4) {
        let mut state = self.state.lock();
        state.counters.view_matrix_sets += 1;
        state.view_matrix = *matrix;
    }

    fn bind_material(&self, material: Option<MaterialId>) {
        let mut state = self.state.lock();
        state.counters.material_binds += 1;
        state.material = material;
    }

    fn apply_state_params(&self, params: &StateParams) {
        let mut state = self.state.lock();
        state.counters.state_params_applied += 1;
        state.params = Some(*params);
    }

    fn active_render_target(&self) -> Option<TextureId> {
        self.state.lock().target
    }

    fn acquire_render_texture(&self, _width: u32, _height: u32) -> TextureId {
        let mut state = self.state.lock();
        let texture = TextureId(state.next_id());
        state.counters.render_textures_acquired += 1;
        state.live_render_textures.push(texture);
        texture
    }

    fn set_render_target(&self, target: Option<TextureId>) {
        let mut state = self.state.lock();
        state.counters.render_target_sets += 1;
        state.target = target;
    }

    fn clear_render_target(&self) {
        self.state.lock().counters.render_target_clears += 1;
    }

    fn release_render_texture(&self, texture: TextureId) {
        let mut state = self.state.lock();
        state.counters.render_textures_released += 1;
        state.live_render_textures.retain(|t| *t != texture);
    }

    fn blit(
        &self,
        _source: TextureId,
        _destination: Option<TextureId>,
        _material: Option<MaterialId>,
    ) {
        self.state.lock().counters.blits += 1;
    }

    fn create_texture(&self, _width: u32, _height: u32, _pixels: &[u8]) -> TextureId {
        let mut state = self.state.lock();
        state.counters.textures_created += 1;
        TextureId(state.next_id())
    }

    fn destroy_texture(&self, _texture: TextureId) {
        self.state.lock().counters.textures_destroyed += 1;
    }

    fn create_material(&self, shader: &str) -> MaterialId {
        let mut state = self.state.lock();
        state.counters.materials_created += 1;
        let material = MaterialId(state.next_id());
        state.material_names.push((material, String::from(shader)));
        material
    }

    fn destroy_material(&self, material: MaterialId) {
        let mut state = self.state.lock();
        state.counters.materials_destroyed += 1;
        state.material_names.retain(|(id, _)| *id != material);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fences_complete_on_wait() {
        let backend = MockBackend::new();
        let a = backend.insert_cpu_fence();
        let b = backend.insert_cpu_fence();
        assert!(b.is_newer_than(a));
        assert!(!backend.cpu_fence_passed(a));

        backend.wait_for_cpu_fence_passed(a);
        assert!(backend.cpu_fence_passed(a));
        assert!(!backend.cpu_fence_passed(b));
        assert_eq!(backend.counters().fence_waits, 1);

        // Waiting on a passed fence does not block
        backend.wait_for_cpu_fence_passed(a);
        assert_eq!(backend.counters().fence_waits, 1);

        backend.complete_all_fences();
        assert!(backend.cpu_fence_passed(b));
    }

    #[test]
    fn test_buffer_lifecycle() {
        let backend = MockBackend::new();
        let vb = backend.create_buffer(BufferKind::Vertex, 64, 36);
        let ib = backend.create_buffer(BufferKind::Index, 128, 2);
        assert_ne!(vb, ib);
        assert_eq!(backend.live_buffers().len(), 2);
        backend.destroy_buffer(vb);
        assert_eq!(backend.live_buffers(), alloc::vec![(ib, BufferKind::Index, 128)]);
    }

    #[test]
    fn test_draw_records_state() {
        let backend = MockBackend::new();
        let mat = backend.create_material("UI/Default");
        backend.bind_material(Some(mat));
        backend.set_scissor_rect(RectInt::new(0, 0, 10, 10));
        let range = DrawRange {
            first_index: 0,
            index_count: 6,
            min_index_val: 0,
            verts_referenced: 4,
        };
        backend.draw_indexed_ranges(
            BufferHandle(1),
            BufferHandle(2),
            &[range],
            &crate::vertex::Vertex::LAYOUT,
        );
        let draws = backend.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].material, Some(mat));
        assert_eq!(draws[0].scissor, Some(RectInt::new(0, 0, 10, 10)));
        assert_eq!(backend.material_shader(mat).as_deref(), Some("UI/Default"));
    }
}
