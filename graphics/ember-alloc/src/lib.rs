//! # EMBER Geometry Allocators
//!
//! Sub-allocation of element ranges inside UI vertex and index buffers.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    GpuBufferAllocator                     │
//! │                                                           │
//! │  ┌──────────────────────┐     ┌────────────────────────┐  │
//! │  │  BestFitAllocator    │     │  BestFitAllocator      │  │
//! │  │  (low, long-lived)   │     │  (high, short-lived,   │  │
//! │  │                      │     │   flipped addresses)   │  │
//! │  └──────────────────────┘     └────────────────────────┘  │
//! │              │                           │                │
//! │  ┌───────────┴───────────────────────────┴─────────────┐  │
//! │  │               One GPU buffer, 0..total              │  │
//! │  └─────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Allocator Design
//!
//! - Best-fit search over an address-ordered free list
//! - Split on allocate, merge with both neighbours on free
//! - High watermark tracking per end; ends colliding is out of memory
//! - Exhaustion is reported as `None`, misuse panics

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod best_fit;
pub mod gpu_buffer;

// Re-exports
pub use best_fit::{Alloc, BestFitAllocator, BlockId, HeapStatistics};
pub use gpu_buffer::GpuBufferAllocator;
