//! # Device Configuration
//!
//! Construction-time settings for [`UiRenderDevice`](crate::UiRenderDevice)
//! and per-call settings for chain evaluation.

use ember_core::{Error, MaterialId, Result};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Vertices addressable by 16-bit indices
pub const MAX_VERTICES_PER_PAGE: u32 = 1 << 16;

/// Slots in the draw range ring (power of two)
pub const DRAW_RANGE_RING_SIZE: usize = 1024;

const _: () = assert!(DRAW_RANGE_RING_SIZE.is_power_of_two());

// =============================================================================
// DEVICE CONFIGURATION
// =============================================================================

/// Render device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Vertex capacity of the first page
    pub initial_vertex_capacity: u32,
    /// Index capacity of the first page
    pub initial_index_capacity: u32,
    /// Meshes above this vertex count get a dedicated page
    /// (`None` uses `initial_vertex_capacity`)
    pub large_mesh_vertex_count: Option<u32>,
    /// Update ranges recorded per data set per frame before saturating
    pub update_range_pool_size: u32,
    /// Consecutive empty frames before a page is released
    pub prune_empty_page_frame_count: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceConfig {
    /// Default configuration
    pub const fn new() -> Self {
        Self {
            initial_vertex_capacity: 8192,
            initial_index_capacity: 16384,
            large_mesh_vertex_count: None,
            update_range_pool_size: 32,
            prune_empty_page_frame_count: 60,
        }
    }

    /// Set the first page capacity
    pub const fn with_initial_capacity(mut self, vertices: u32, indices: u32) -> Self {
        self.initial_vertex_capacity = vertices;
        self.initial_index_capacity = indices;
        self
    }

    /// Set the dedicated page threshold
    pub const fn with_large_mesh_vertex_count(mut self, count: u32) -> Self {
        self.large_mesh_vertex_count = Some(count);
        self
    }

    /// Set the update range pool size
    pub const fn with_update_range_pool_size(mut self, size: u32) -> Self {
        self.update_range_pool_size = size;
        self
    }

    /// Set the empty page pruning delay
    pub const fn with_prune_empty_page_frame_count(mut self, frames: u32) -> Self {
        self.prune_empty_page_frame_count = frames;
        self
    }

    /// Effective dedicated page threshold
    pub const fn large_mesh_threshold(&self) -> u32 {
        match self.large_mesh_vertex_count {
            Some(count) => count,
            None => self.initial_vertex_capacity,
        }
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.initial_vertex_capacity == 0
            || self.initial_vertex_capacity > MAX_VERTICES_PER_PAGE
        {
            return Err(Error::InvalidConfig("initial_vertex_capacity"));
        }
        if self.initial_index_capacity == 0 {
            return Err(Error::InvalidConfig("initial_index_capacity"));
        }
        let threshold = self.large_mesh_threshold();
        if threshold == 0 || threshold > MAX_VERTICES_PER_PAGE {
            return Err(Error::InvalidConfig("large_mesh_vertex_count"));
        }
        if self.update_range_pool_size == 0 {
            return Err(Error::InvalidConfig("update_range_pool_size"));
        }
        if self.prune_empty_page_frame_count == 0 {
            return Err(Error::InvalidConfig("prune_empty_page_frame_count"));
        }
        Ok(())
    }
}

// =============================================================================
// EVALUATION PARAMETERS
// =============================================================================

/// Settings for one chain evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluateParams {
    /// Material the caller already has bound
    pub initial_material: Option<MaterialId>,
    /// Material for draws that do not name one
    pub default_material: Option<MaterialId>,
    /// Pixels per UI point
    pub pixels_per_point: f32,
    /// Whether draws may switch away from a bound material
    pub allow_material_change: bool,
}

impl Default for EvaluateParams {
    fn default() -> Self {
        Self {
            initial_material: None,
            default_material: None,
            pixels_per_point: 1.0,
            allow_material_change: true,
        }
    }
}

impl EvaluateParams {
    /// Set the material already bound
    pub const fn with_initial_material(mut self, material: MaterialId) -> Self {
        self.initial_material = Some(material);
        self
    }

    /// Set the default material
    pub const fn with_default_material(mut self, material: MaterialId) -> Self {
        self.default_material = Some(material);
        self
    }

    /// Set the pixel density
    pub const fn with_pixels_per_point(mut self, pixels_per_point: f32) -> Self {
        self.pixels_per_point = pixels_per_point;
        self
    }

    /// Forbid material switches
    pub const fn without_material_change(mut self) -> Self {
        self.allow_material_change = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DeviceConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.large_mesh_threshold(), 8192);
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let config = DeviceConfig::new().with_initial_capacity(0, 16);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig("initial_vertex_capacity"))
        );

        let config = DeviceConfig::new().with_initial_capacity(MAX_VERTICES_PER_PAGE + 1, 16);
        assert!(config.validate().is_err());

        let config = DeviceConfig::new().with_large_mesh_vertex_count(100_000);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig("large_mesh_vertex_count"))
        );

        let config = DeviceConfig::new().with_update_range_pool_size(0);
        assert_eq!(
            config.validate(),
            Err(Error::InvalidConfig("update_range_pool_size"))
        );
    }
}
