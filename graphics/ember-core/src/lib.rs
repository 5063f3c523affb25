//! # EMBER Core
//!
//! Foundational types shared by the EMBER UI render device crates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ember-core                           │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Backend   │  │   Types     │  │   Sync              │  │
//! │  │ (GpuBackend,│  │ (Rect, ids, │  │ (FrameRing,         │  │
//! │  │  Mock)      │  │  Vertex)    │  │  FrameFences)       │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌─────────────┐  ┌─────────────────────────────────────┐   │
//! │  │   Error     │  │   SlotArena (generational handles)  │   │
//! │  └─────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod backend;
pub mod error;
pub mod handle;
pub mod sync;
pub mod types;
pub mod vertex;

// Re-exports for convenience
pub use backend::mock::{MockBackend, MockCounters, MockDraw, MockUpload};
pub use backend::{BufferKind, DrawRange, GpuBackend, StateParams, UpdateRange};
pub use error::{Error, ImmediateError, Result};
pub use handle::{SlotArena, SlotKey};
pub use sync::{FenceId, FrameFences, FrameRing, MAX_QUEUED_FRAME_COUNT};
pub use types::*;
pub use vertex::{Vertex, VertexAttribute, VertexFormat, VertexLayout};
