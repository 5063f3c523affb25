//! # Graphics Resource Context
//!
//! Process-wide render resources: the default material and textures shared
//! by every device, and the queue of GPU buffers waiting for the GPU to
//! finish with them before they are destroyed.
//!
//! ```text
//!   UiRenderDevice::dispose ──> enqueue_disposal(buffers, fence)
//!                                          │
//!   engine_update (each frame) ──> fence passed? ──> destroy_buffer
//! ```

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use ember_core::{BufferHandle, Error, FenceId, GpuBackend, MaterialId, Result, TextureId};

use crate::config::DeviceConfig;
use crate::device::UiRenderDevice;

/// Shader name of the default UI material
pub const DEFAULT_MATERIAL_SHADER: &str = "UI/Default";

/// Size of the shader info lookup texture
const SHADER_INFO_TEXTURE_SIZE: u32 = 64;

/// Resources created by [`GraphicsResourceContext::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultResources {
    /// Material used when no other is bound
    pub default_material: MaterialId,
    /// 1x1 opaque white texture
    pub white_texture: TextureId,
    /// Per-vertex shader info lookup texture
    pub shader_info_texture: TextureId,
}

#[derive(Debug)]
struct PendingDisposal {
    fence: FenceId,
    buffers: Vec<BufferHandle>,
}

/// Shared render resources and deferred buffer destruction
pub struct GraphicsResourceContext<B: GpuBackend> {
    backend: Arc<B>,
    defaults: Option<DefaultResources>,
    pending: Mutex<VecDeque<PendingDisposal>>,
    synchronous_free: AtomicBool,
    shut_down: bool,
}

impl<B: GpuBackend> core::fmt::Debug for GraphicsResourceContext<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GraphicsResourceContext")
            .field("defaults", &self.defaults)
            .field("pending", &self.pending_disposal_count())
            .field("synchronous_free", &self.is_synchronous_free_mode())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl<B: GpuBackend> GraphicsResourceContext<B> {
    /// Create an uninitialized context
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            defaults: None,
            pending: Mutex::new(VecDeque::new()),
            synchronous_free: AtomicBool::new(false),
            shut_down: false,
        }
    }

    /// Backend in use
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Create the default resources
    pub fn init(&mut self) -> Result<&DefaultResources> {
        if self.shut_down {
            return Err(Error::DeviceShutdown);
        }
        if self.defaults.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let default_material = self.backend.create_material(DEFAULT_MATERIAL_SHADER);
        let white_texture = self.backend.create_texture(1, 1, &[0xFF; 4]);
        let info = shader_info_pixels();
        let shader_info_texture =
            self.backend
                .create_texture(SHADER_INFO_TEXTURE_SIZE, SHADER_INFO_TEXTURE_SIZE, &info);

        log::info!(
            "GraphicsResourceContext: initialized ({:?}, {:?}, {:?})",
            default_material,
            white_texture,
            shader_info_texture
        );
        Ok(&*self.defaults.insert(DefaultResources {
            default_material,
            white_texture,
            shader_info_texture,
        }))
    }

    /// Default resources created by `init`
    pub fn defaults(&self) -> Result<&DefaultResources> {
        self.defaults.as_ref().ok_or(Error::NotInitialized)
    }

    /// Create a render device on this context's backend
    pub fn create_device(&self, config: DeviceConfig) -> Result<UiRenderDevice<B>> {
        if self.shut_down {
            return Err(Error::DeviceShutdown);
        }
        UiRenderDevice::new(self.backend.clone(), config)
    }

    // =========================================================================
    // DEFERRED DISPOSAL
    // =========================================================================

    /// Destroy `buffers` once the GPU has finished all work issued so far
    pub fn enqueue_disposal(&self, buffers: Vec<BufferHandle>) -> Result<()> {
        if self.shut_down {
            return Err(Error::DeviceShutdown);
        }
        if buffers.is_empty() {
            return Ok(());
        }

        let fence = self.backend.insert_cpu_fence();
        if self.is_synchronous_free_mode() {
            self.backend.wait_for_cpu_fence_passed(fence);
            self.destroy(&buffers);
            return Ok(());
        }

        log::debug!(
            "GraphicsResourceContext: {} buffers queued behind {:?}",
            buffers.len(),
            fence
        );
        self.pending.lock().push_back(PendingDisposal { fence, buffers });
        Ok(())
    }

    /// Destroy queued buffers whose fence has passed
    ///
    /// Returns the number of buffers destroyed.
    pub fn engine_update(&self) -> usize {
        let mut destroyed = 0;
        let mut pending = self.pending.lock();
        while let Some(front) = pending.front() {
            if !self.backend.cpu_fence_passed(front.fence) {
                break;
            }
            if let Some(disposal) = pending.pop_front() {
                destroyed += disposal.buffers.len();
                self.destroy(&disposal.buffers);
            }
        }
        destroyed
    }

    /// Wait for and destroy every queued buffer
    pub fn flush_all_pending(&self) -> usize {
        let drained: Vec<PendingDisposal> = self.pending.lock().drain(..).collect();
        let mut destroyed = 0;
        for disposal in drained {
            self.backend.wait_for_cpu_fence_passed(disposal.fence);
            destroyed += disposal.buffers.len();
            self.destroy(&disposal.buffers);
        }
        destroyed
    }

    /// Switch to destroying buffers as soon as they are disposed
    ///
    /// Irreversible; used during process exit. Already queued buffers are
    /// flushed.
    pub fn enter_synchronous_free_mode(&self) {
        if !self.synchronous_free.swap(true, Ordering::AcqRel) {
            let flushed = self.flush_all_pending();
            log::debug!(
                "GraphicsResourceContext: synchronous free mode, flushed {} buffers",
                flushed
            );
        }
    }

    /// Whether synchronous free mode is on
    pub fn is_synchronous_free_mode(&self) -> bool {
        self.synchronous_free.load(Ordering::Acquire)
    }

    /// Disposals still waiting on their fence
    pub fn pending_disposal_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Flush every disposal and destroy the default resources
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Err(Error::DeviceShutdown);
        }
        let flushed = self.flush_all_pending();
        if let Some(defaults) = self.defaults.take() {
            self.backend.destroy_material(defaults.default_material);
            self.backend.destroy_texture(defaults.white_texture);
            self.backend.destroy_texture(defaults.shader_info_texture);
        }
        self.shut_down = true;
        log::info!(
            "GraphicsResourceContext: shut down, flushed {} buffers",
            flushed
        );
        Ok(())
    }

    fn destroy(&self, buffers: &[BufferHandle]) {
        for &buffer in buffers {
            self.backend.destroy_buffer(buffer);
        }
    }
}

/// RGBA8 pixels of the shader info texture
///
/// Texel (x, y) stores the 8-bit coordinates themselves so a vertex's
/// `xform_clip_pages` bytes address it directly; alpha is opaque.
fn shader_info_pixels() -> Vec<u8> {
    let size = SHADER_INFO_TEXTURE_SIZE as usize;
    let mut pixels = Vec::with_capacity(size * size * 4);
    for y in 0..size {
        for x in 0..size {
            pixels.extend_from_slice(&[x as u8, y as u8, 0, 0xFF]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::MockBackend;

    fn context() -> GraphicsResourceContext<MockBackend> {
        GraphicsResourceContext::new(Arc::new(MockBackend::new()))
    }

    #[test]
    fn test_init_creates_defaults_once() {
        let mut context = context();
        assert_eq!(context.defaults(), Err(Error::NotInitialized));

        let defaults = *context.init().unwrap();
        assert_eq!(context.defaults(), Ok(&defaults));
        assert_eq!(
            context.backend().material_shader(defaults.default_material).as_deref(),
            Some(DEFAULT_MATERIAL_SHADER)
        );
        assert_eq!(context.backend().counters().textures_created, 2);
        assert_eq!(context.init().err(), Some(Error::AlreadyInitialized));

        context.shutdown().unwrap();
        let counters = context.backend().counters();
        assert_eq!(counters.materials_destroyed, 1);
        assert_eq!(counters.textures_destroyed, 2);
        assert_eq!(context.init().err(), Some(Error::DeviceShutdown));
        assert_eq!(context.shutdown(), Err(Error::DeviceShutdown));
    }

    #[test]
    fn test_disposal_waits_for_fence() {
        let context = context();
        let mut device = context.create_device(DeviceConfig::default()).unwrap();
        let (mesh, _) = device.allocate(4, 6).unwrap();
        device.free(mesh);
        assert_eq!(context.backend().live_buffers().len(), 2);

        device.dispose(&context).unwrap();
        assert_eq!(context.pending_disposal_count(), 1);
        assert_eq!(context.engine_update(), 0);
        assert_eq!(context.backend().live_buffers().len(), 2);

        context.backend().complete_all_fences();
        assert_eq!(context.engine_update(), 2);
        assert_eq!(context.pending_disposal_count(), 0);
        assert!(context.backend().live_buffers().is_empty());
    }

    #[test]
    fn test_synchronous_free_mode() {
        let context = context();
        let mut first = context.create_device(DeviceConfig::default()).unwrap();
        let mut second = context.create_device(DeviceConfig::default()).unwrap();
        let (mesh, _) = second.allocate(8, 12).unwrap();
        second.free(mesh);

        // Queued disposals are flushed on entry
        second.dispose(&context).unwrap();
        assert_eq!(context.pending_disposal_count(), 1);
        context.enter_synchronous_free_mode();
        assert!(context.is_synchronous_free_mode());
        assert_eq!(context.pending_disposal_count(), 0);
        assert!(context.backend().live_buffers().is_empty());

        // New disposals are destroyed immediately
        let (mesh, _) = first.allocate(8, 12).unwrap();
        first.free(mesh);
        first.dispose(&context).unwrap();
        assert_eq!(context.pending_disposal_count(), 0);
        assert!(context.backend().live_buffers().is_empty());
    }

    #[test]
    fn test_shader_info_pixels_address_themselves() {
        let pixels = shader_info_pixels();
        let size = SHADER_INFO_TEXTURE_SIZE as usize;
        assert_eq!(pixels.len(), size * size * 4);
        let texel = (3 * size + 5) * 4;
        assert_eq!(&pixels[texel..texel + 4], &[5, 3, 0, 0xFF]);
    }
}
