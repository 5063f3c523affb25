//! # Chain Evaluation
//!
//! Walks a [`RenderChain`] and turns its draws into as few backend calls as
//! possible.
//!
//! ## Batching
//!
//! ```text
//! Draw ─> same page, same state, contiguous? ──yes──> extend current range
//!                 │ no
//!                 ▼
//!          stash range into ring ──ring full or state/page change──> kick
//!                                                                     │
//!                      one draw_indexed_ranges call per contiguous ring span
//! ```
//!
//! Consecutive draws whose indices follow each other exactly share one
//! range. A gap starts a new range in the same call; a material, texture or
//! page change issues the call.

use ember_core::{
    BufferHandle, DrawRange, Error, GpuBackend, MaterialId, Rect, Result, SlotArena,
    StateParams, TextureId, Vertex, IDENTITY,
};

use crate::chain::{ImmediateCallback, RenderChain, RenderChainCommand};
use crate::config::{EvaluateParams, DRAW_RANGE_RING_SIZE};
use crate::device::UiRenderDevice;
use crate::draw_params::{points_to_pixels, points_to_pixels_flip_y, DrawParams, UNLIMITED_RECT};
use crate::mesh::{MeshId, MeshRecord};
use crate::page::{Page, PageId};
use crate::stats::DrawStatistics;

const RING_MASK: usize = DRAW_RANGE_RING_SIZE - 1;

bitflags::bitflags! {
    /// Render state that differs from what is bound
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateChanges: u8 {
        /// Material must be rebound
        const MATERIAL = 1 << 0;
        /// Textures must be reapplied
        const PARAMS = 1 << 1;
    }
}

/// How a chain evaluation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluateOutcome {
    /// Every command ran
    Completed,
    /// Stopped at a draw needing a material switch while switches were
    /// forbidden
    MaterialChangeDisallowed,
}

enum Flow {
    Continue,
    Stop,
}

impl<B: GpuBackend> UiRenderDevice<B> {
    /// Evaluate a render chain
    ///
    /// Draws are batched into ranges and submitted per page and state.
    /// Stacks left unbalanced by the chain are unwound afterwards, and a
    /// CPU fence is recorded for the frame. An immediate callback failure
    /// stops evaluation and is returned once render state is restored.
    pub fn evaluate_chain(
        &mut self,
        chain: &mut RenderChain,
        params: &EvaluateParams,
    ) -> Result<EvaluateOutcome> {
        let base_target = self.backend.active_render_target();
        let mut evaluator = ChainEvaluator {
            backend: &*self.backend,
            meshes: &self.meshes,
            pages: &self.pages,
            stats: &mut self.draw_stats,
            ring: &mut self.draw_ranges,
            ring_start: 0,
            ring_ready: 0,
            params,
            draw_params: DrawParams::new(base_target, params.default_material),
            cur_buffers: None,
            cur_page: None,
            cur_material: params.initial_material.map(Some),
            bound_material: params.initial_material.map(Some),
            cur_params: None,
            cur_range: DrawRange::default(),
            cur_draw_index: 0,
        };

        let result = evaluator.run(chain);
        evaluator.flush();
        match result {
            Ok(EvaluateOutcome::Completed) if evaluator.draw_params.is_balanced() => {}
            Ok(EvaluateOutcome::Completed) => {
                log::warn!(
                    "UiRenderDevice: chain left stacks unbalanced (scissor {}, view {}, targets {})",
                    evaluator.draw_params.scissor_depth(),
                    evaluator.draw_params.view_depth(),
                    evaluator.draw_params.render_textures().len()
                );
                evaluator.teardown();
            }
            _ => evaluator.teardown(),
        }

        self.update_fence_value();
        log::debug!(
            "UiRenderDevice: evaluated {} commands, {} ranges in {} calls",
            self.draw_stats.command_count,
            self.draw_stats.draw_range_count,
            self.draw_stats.draw_range_call_count
        );
        result
    }
}

/// Per-evaluation state
struct ChainEvaluator<'a, B: GpuBackend> {
    backend: &'a B,
    meshes: &'a SlotArena<MeshRecord>,
    pages: &'a SlotArena<Page>,
    stats: &'a mut DrawStatistics,
    ring: &'a mut [DrawRange],
    ring_start: usize,
    ring_ready: usize,
    params: &'a EvaluateParams,
    draw_params: DrawParams,
    /// Index and vertex buffers of `cur_page`
    cur_buffers: Option<(BufferHandle, BufferHandle)>,
    cur_page: Option<PageId>,
    /// Outer `None` means nothing known to be bound
    cur_material: Option<Option<MaterialId>>,
    /// Last material bound on the backend; kept across forced rebinds
    bound_material: Option<Option<MaterialId>>,
    cur_params: Option<StateParams>,
    cur_range: DrawRange,
    /// Index that would continue the current range
    cur_draw_index: u32,
}

impl<B: GpuBackend> ChainEvaluator<'_, B> {
    fn run(&mut self, chain: &mut RenderChain) -> Result<EvaluateOutcome> {
        let mut cursor = chain.head();
        while let Some(id) = cursor {
            cursor = chain.next(id);
            let Some(command) = chain.get_mut(id) else {
                break;
            };
            self.stats.command_count += 1;

            if let RenderChainCommand::Draw {
                mesh,
                index_offset,
                index_count,
                state,
            } = command
            {
                if let Flow::Stop = self.process_draw(*mesh, *index_offset, *index_count, state) {
                    return Ok(EvaluateOutcome::MaterialChangeDisallowed);
                }
                continue;
            }

            self.flush();
            match command {
                RenderChainCommand::Draw { .. } => {}
                RenderChainCommand::Immediate(callback) => self.run_immediate(callback)?,
                RenderChainCommand::ImmediateCull {
                    world_bound,
                    callback,
                } => {
                    let visible = world_bound.intersect(&self.draw_params.scissor());
                    let pixels = points_to_pixels(&visible, self.params.pixels_per_point);
                    if pixels.overlaps(&self.backend.active_viewport()) {
                        self.run_immediate(callback)?;
                    }
                }
                RenderChainCommand::PushView { transform, clip } => {
                    self.draw_params.push_view(*transform);
                    self.backend.set_view_matrix(transform);
                    let combined = self.draw_params.push_scissor(*clip);
                    self.apply_scissor(combined);
                }
                RenderChainCommand::PopView => {
                    let view = *self.draw_params.pop_view();
                    self.backend.set_view_matrix(&view);
                    let top = self.draw_params.pop_scissor();
                    self.apply_scissor(top);
                }
                RenderChainCommand::PushScissor { clip } => {
                    let combined = self.draw_params.push_scissor(*clip);
                    self.apply_scissor(combined);
                }
                RenderChainCommand::PopScissor => {
                    let top = self.draw_params.pop_scissor();
                    self.apply_scissor(top);
                }
                RenderChainCommand::PushRenderTexture => self.push_render_texture(),
                RenderChainCommand::PopRenderTexture => {
                    let previous = self.draw_params.previous_render_target();
                    assert!(
                        previous == self.backend.active_render_target(),
                        "UiRenderDevice: previous render texture was not blitted"
                    );
                    if let Some(texture) = self.draw_params.pop_render_texture() {
                        self.backend.release_render_texture(texture);
                    }
                }
                RenderChainCommand::BlitToPreviousRt { material } => {
                    let previous = self.draw_params.previous_render_target();
                    if let Some(source) = self.draw_params.render_target() {
                        self.backend.blit(source, previous, *material);
                    }
                    self.backend.set_render_target(previous);
                    self.force_rebind();
                }
                RenderChainCommand::PushDefaultMaterial { material } => {
                    self.draw_params.push_default_material(*material);
                }
                RenderChainCommand::PopDefaultMaterial => {
                    self.draw_params.pop_default_material();
                }
            }
        }
        Ok(EvaluateOutcome::Completed)
    }

    // =========================================================================
    // DRAWS
    // =========================================================================

    fn process_draw(
        &mut self,
        mesh: MeshId,
        index_offset: u32,
        index_count: u32,
        state: &StateParams,
    ) -> Flow {
        self.stats.draw_command_count += 1;
        self.stats.total_indices += index_count;
        if index_count == 0 {
            return Flow::Continue;
        }

        let (meshes, pages) = (self.meshes, self.pages);
        let Some(record) = meshes.get(mesh.0) else {
            log::warn!("UiRenderDevice: chain draws freed mesh {:?}", mesh);
            return Flow::Continue;
        };
        let Some(page) = pages.get(record.page.0) else {
            log::warn!("UiRenderDevice: mesh {:?} on missing page", mesh);
            return Flow::Continue;
        };

        let first_index = record.indices.start + index_offset;
        let material = state.material.or(self.draw_params.default_material());
        let effective = StateParams { material, ..*state };

        let mut changes = StateChanges::empty();
        if self.cur_material != Some(material) {
            changes |= StateChanges::MATERIAL;
        }
        if self
            .cur_params
            .map_or(true, |p| p.texture != state.texture || p.font != state.font)
        {
            changes |= StateChanges::PARAMS;
        }

        if changes.contains(StateChanges::MATERIAL)
            && !self.params.allow_material_change
            && self.bound_material.is_some_and(|bound| bound != material)
        {
            log::warn!(
                "UiRenderDevice: material change to {:?} not allowed, stopping chain",
                material
            );
            return Flow::Stop;
        }

        let page_changed = self.cur_page != Some(record.page);
        let mut kick = !changes.is_empty() || page_changed;
        if (kick || self.cur_draw_index != first_index) && self.stash_range() {
            kick = true;
        }
        if kick {
            self.kick_ranges();
        }

        if changes.contains(StateChanges::MATERIAL) {
            self.backend.bind_material(material);
            self.cur_material = Some(material);
            self.bound_material = Some(material);
            self.stats.material_set_count += 1;
        }
        if !changes.is_empty() {
            self.backend.apply_state_params(&effective);
            self.cur_params = Some(effective);
            self.stats.state_param_changes += 1;
        }
        if page_changed {
            self.cur_page = Some(record.page);
            self.cur_buffers = Some(page.buffers());
        }

        let verts = record.verts;
        if self.cur_range.index_count == 0 {
            self.cur_range = DrawRange {
                first_index,
                index_count,
                min_index_val: verts.start,
                verts_referenced: verts.size,
            };
        } else {
            let range = &mut self.cur_range;
            let min = range.min_index_val.min(verts.start);
            let end = (range.min_index_val + range.verts_referenced).max(verts.end());
            range.index_count += index_count;
            range.min_index_val = min;
            range.verts_referenced = end - min;
        }
        self.cur_draw_index = first_index + index_count;
        Flow::Continue
    }

    /// Move the current range into the ring; returns whether the ring is full
    fn stash_range(&mut self) -> bool {
        if self.cur_range.index_count == 0 {
            return false;
        }
        let slot = (self.ring_start + self.ring_ready) & RING_MASK;
        self.ring[slot] = self.cur_range;
        self.cur_range.index_count = 0;
        self.ring_ready += 1;
        self.stats.draw_range_count += 1;
        self.ring_ready == DRAW_RANGE_RING_SIZE
    }

    /// Submit every ready range
    fn kick_ranges(&mut self) {
        if self.ring_ready == 0 {
            return;
        }
        if let Some((index_buffer, vertex_buffer)) = self.cur_buffers {
            let start = self.ring_start;
            let end = start + self.ring_ready;
            if end <= DRAW_RANGE_RING_SIZE {
                self.backend.draw_indexed_ranges(
                    index_buffer,
                    vertex_buffer,
                    &self.ring[start..end],
                    &Vertex::LAYOUT,
                );
                self.stats.draw_range_call_count += 1;
            } else {
                // Ready ranges wrap around the end of the ring
                self.backend.draw_indexed_ranges(
                    index_buffer,
                    vertex_buffer,
                    &self.ring[start..],
                    &Vertex::LAYOUT,
                );
                self.backend.draw_indexed_ranges(
                    index_buffer,
                    vertex_buffer,
                    &self.ring[..end - DRAW_RANGE_RING_SIZE],
                    &Vertex::LAYOUT,
                );
                self.stats.draw_range_call_count += 2;
            }
        }
        self.ring_start = (self.ring_start + self.ring_ready) & RING_MASK;
        self.ring_ready = 0;
    }

    fn flush(&mut self) {
        self.stash_range();
        self.kick_ranges();
    }

    fn force_rebind(&mut self) {
        self.cur_material = None;
        self.cur_params = None;
    }

    // =========================================================================
    // STATE
    // =========================================================================

    fn run_immediate(&mut self, callback: &mut ImmediateCallback) -> Result<()> {
        self.stats.immediate_draws += 1;
        let clipped = self.draw_params.scissor_depth() > 1;
        if clipped {
            self.backend.disable_scissor();
        }

        let result = callback.call(&self.draw_params);

        self.backend.set_view_matrix(self.draw_params.view());
        if clipped {
            self.apply_scissor(self.draw_params.scissor());
        }
        self.force_rebind();

        result.map_err(|e| {
            log::error!("UiRenderDevice: immediate callback failed: {}", e);
            Error::from(e)
        })
    }

    fn apply_scissor(&self, clip: Rect) {
        if clip == UNLIMITED_RECT {
            self.backend.disable_scissor();
        } else {
            let viewport = self.backend.active_viewport();
            self.backend.set_scissor_rect(points_to_pixels_flip_y(
                &clip,
                self.params.pixels_per_point,
                &viewport,
            ));
        }
    }

    fn push_render_texture(&mut self) {
        let viewport = self.backend.active_viewport();
        let texture = self
            .backend
            .acquire_render_texture(viewport.width as u32, viewport.height as u32);
        self.backend.set_render_target(Some(texture));
        self.backend.clear_render_target();
        self.draw_params.push_render_texture(texture);
        if self.draw_params.scissor_depth() > 1 {
            self.apply_scissor(self.draw_params.scissor());
        }
        self.force_rebind();
    }

    /// Restore backend state after an aborted or unbalanced chain
    fn teardown(&mut self) {
        if self.draw_params.scissor_depth() > 1 {
            self.backend.disable_scissor();
        }
        if self.draw_params.view_depth() > 1 {
            self.backend.set_view_matrix(&IDENTITY);
        }
        let base: Option<TextureId> = self.draw_params.render_textures()[0];
        let textures = self.draw_params.unwind();
        if !textures.is_empty() {
            self.backend.set_render_target(base);
            for texture in textures {
                self.backend.release_render_texture(texture);
            }
        }
    }
}
