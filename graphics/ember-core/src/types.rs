//! # EMBER Core Types
//!
//! Geometry and resource identifiers shared across the render device.

use core::fmt;

// =============================================================================
// RESOURCE IDS
// =============================================================================

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Get the raw value
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

resource_id! {
    /// GPU buffer created by the backend
    BufferHandle
}

resource_id! {
    /// Material (shader + pass) known to the backend
    MaterialId
}

resource_id! {
    /// Texture or render target known to the backend
    TextureId
}

// =============================================================================
// MATRIX
// =============================================================================

/// Column-major 4x4 transform
pub type Mat4 = [f32; 16];

/// Identity transform
pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

// =============================================================================
// RECT
// =============================================================================

/// Axis-aligned rectangle in points
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Rect {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl Rect {
    /// Creates a new rect
    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge
    #[inline]
    pub fn x_max(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge
    #[inline]
    pub fn y_max(&self) -> f32 {
        self.y + self.height
    }

    /// Intersection of two rects
    ///
    /// Disjoint rects collapse to a zero-sized rect anchored at the
    /// intersection's top-left corner.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let x_max = x.max(self.x_max().min(other.x_max()));
        let y_max = y.max(self.y_max().min(other.y_max()));
        Rect::new(x, y, x_max - x, y_max - y)
    }

    /// Scale every component by `factor`
    pub fn scaled(&self, factor: f32) -> Rect {
        Rect::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }
}

/// Integer rectangle in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub struct RectInt {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width
    pub width: i32,
    /// Height
    pub height: i32,
}

impl RectInt {
    /// Creates a new rect
    #[inline]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Right edge
    #[inline]
    pub const fn x_max(&self) -> i32 {
        self.x + self.width
    }

    /// Bottom edge
    #[inline]
    pub const fn y_max(&self) -> i32 {
        self.y + self.height
    }

    /// Whether the rect covers no pixels
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Strict overlap test; touching edges and empty rects do not overlap
    pub const fn overlaps(&self, other: &RectInt) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.x_max()
            && other.x < self.x_max()
            && self.y < other.y_max()
            && other.y < self.y_max()
    }
}
