//! # EMBER Device
//!
//! Retained-mode geometry storage and draw submission for UI meshes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    GraphicsResourceContext                      │
//! │        (default resources, fence-gated buffer disposal)         │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │ create_device
//! ┌───────────────────────────────▼─────────────────────────────────┐
//! │                        UiRenderDevice                           │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌────────────────────┐  │
//! │  │   Meshes    │  │   Frame Ring     │  │  Chain Evaluator   │  │
//! │  │ (handles,   │  │ (deferred frees, │  │ (range batching,   │  │
//! │  │  records)   │  │  copy backs)     │  │  DrawParams)       │  │
//! │  └──────┬──────┘  └──────────────────┘  └─────────┬──────────┘  │
//! │         │                                         │             │
//! │  ┌──────▼─────────────────────────────────────────▼──────────┐  │
//! │  │  Pages: DataSet<Vertex> + DataSet<u16>                    │  │
//! │  │  (CPU mirror, GpuBufferAllocator, pooled update ranges)   │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────┬───────────────────────────────┘
//!                                   │
//!                              GpuBackend
//! ```
//!
//! ## Frame Protocol
//!
//! 1. `advance_frame` waits on the fence of the frame that last used the
//!    current slot and performs its queued frees and copy backs
//! 2. `allocate`, `update` and `free` mesh geometry
//! 3. `on_frame_rendering_begin` uploads dirty ranges
//! 4. `evaluate_chain` draws and records the frame's fence

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod chain;
pub mod config;
pub mod context;
pub mod data_set;
pub mod device;
pub mod draw_params;
pub mod evaluate;
pub mod mesh;
pub mod page;
pub mod stats;

// Re-exports for convenience
pub use chain::{CommandId, ImmediateCallback, RenderChain, RenderChainCommand};
pub use config::{DeviceConfig, EvaluateParams, DRAW_RANGE_RING_SIZE, MAX_VERTICES_PER_PAGE};
pub use context::{DefaultResources, GraphicsResourceContext, DEFAULT_MATERIAL_SHADER};
pub use data_set::DataSet;
pub use device::UiRenderDevice;
pub use draw_params::{DrawParams, UNLIMITED_RECT};
pub use evaluate::{EvaluateOutcome, StateChanges};
pub use mesh::{MeshHandle, MeshId, MeshInfo, MeshState, MeshWrite};
pub use page::{Page, PageId};
pub use stats::{AllocationStatistics, DrawStatistics, PageStatistics};
