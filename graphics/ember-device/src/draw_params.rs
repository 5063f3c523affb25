//! # Draw Parameters
//!
//! Render state stacks maintained while a chain is evaluated, and the rect
//! conversions used to feed the scissor.

use alloc::vec;
use alloc::vec::Vec;

use ember_core::{Mat4, MaterialId, Rect, RectInt, TextureId, IDENTITY};

/// Scissor rect meaning "no clipping"
pub const UNLIMITED_RECT: Rect = Rect::new(-100000.0, -100000.0, 200000.0, 200000.0);

/// State stacks visible to immediate callbacks
///
/// Every stack keeps its base entry; popping the base is a fatal error.
#[derive(Debug, Clone)]
pub struct DrawParams {
    scissor: Vec<Rect>,
    view: Vec<Mat4>,
    render_textures: Vec<Option<TextureId>>,
    default_materials: Vec<Option<MaterialId>>,
}

impl DrawParams {
    /// Fresh stacks on top of `target` and `default_material`
    pub fn new(target: Option<TextureId>, default_material: Option<MaterialId>) -> Self {
        Self {
            scissor: vec![UNLIMITED_RECT],
            view: vec![IDENTITY],
            render_textures: vec![target],
            default_materials: vec![default_material],
        }
    }

    /// Current clip rect in points
    pub fn scissor(&self) -> Rect {
        self.scissor.last().copied().unwrap_or(UNLIMITED_RECT)
    }

    /// Scissor stack depth, 1 when unclipped
    pub fn scissor_depth(&self) -> usize {
        self.scissor.len()
    }

    /// Current view transform
    pub fn view(&self) -> &Mat4 {
        self.view.last().unwrap_or(&IDENTITY)
    }

    /// View stack depth
    pub fn view_depth(&self) -> usize {
        self.view.len()
    }

    /// Render target being drawn into
    pub fn render_target(&self) -> Option<TextureId> {
        self.render_textures.last().copied().flatten()
    }

    /// Render target stack, base first
    pub fn render_textures(&self) -> &[Option<TextureId>] {
        &self.render_textures
    }

    /// Material for draws that do not name one
    pub fn default_material(&self) -> Option<MaterialId> {
        self.default_materials.last().copied().flatten()
    }

    /// Whether every stack is back at its base entry
    pub fn is_balanced(&self) -> bool {
        self.scissor.len() == 1
            && self.view.len() == 1
            && self.render_textures.len() == 1
            && self.default_materials.len() == 1
    }

    pub(crate) fn push_scissor(&mut self, clip: Rect) -> Rect {
        let combined = combine_scissor_rects(&clip, &self.scissor());
        self.scissor.push(combined);
        combined
    }

    pub(crate) fn pop_scissor(&mut self) -> Rect {
        assert!(self.scissor.len() > 1, "DrawParams: unbalanced scissor pop");
        self.scissor.pop();
        self.scissor()
    }

    pub(crate) fn push_view(&mut self, transform: Mat4) {
        self.view.push(transform);
    }

    pub(crate) fn pop_view(&mut self) -> &Mat4 {
        assert!(self.view.len() > 1, "DrawParams: unbalanced view pop");
        self.view.pop();
        self.view()
    }

    pub(crate) fn push_render_texture(&mut self, texture: TextureId) {
        self.render_textures.push(Some(texture));
    }

    pub(crate) fn pop_render_texture(&mut self) -> Option<TextureId> {
        assert!(
            self.render_textures.len() > 1,
            "DrawParams: unbalanced render texture pop"
        );
        self.render_textures.pop().flatten()
    }

    /// Target below the current one
    pub(crate) fn previous_render_target(&self) -> Option<TextureId> {
        let len = self.render_textures.len();
        assert!(len > 1, "DrawParams: no previous render texture");
        self.render_textures[len - 2]
    }

    pub(crate) fn push_default_material(&mut self, material: Option<MaterialId>) {
        self.default_materials.push(material);
    }

    pub(crate) fn pop_default_material(&mut self) {
        assert!(
            self.default_materials.len() > 1,
            "DrawParams: unbalanced default material pop"
        );
        self.default_materials.pop();
    }

    /// Drop every pushed entry, returning the temporary textures
    pub(crate) fn unwind(&mut self) -> Vec<TextureId> {
        self.scissor.truncate(1);
        self.view.truncate(1);
        self.default_materials.truncate(1);
        self.render_textures.drain(1..).flatten().collect()
    }
}

/// Intersection of two clip rects
pub fn combine_scissor_rects(a: &Rect, b: &Rect) -> Rect {
    a.intersect(b)
}

/// Convert a rect in points to viewport pixels with a bottom-left origin
pub fn points_to_pixels_flip_y(rect: &Rect, pixels_per_point: f32, viewport: &RectInt) -> RectInt {
    let height = viewport.height as f32;
    RectInt::new(
        round_to_int(rect.x * pixels_per_point),
        round_to_int(height - rect.y_max() * pixels_per_point),
        round_to_int(rect.width * pixels_per_point),
        round_to_int(rect.height * pixels_per_point),
    )
}

/// Convert a rect in points to pixels without flipping
pub fn points_to_pixels(rect: &Rect, pixels_per_point: f32) -> RectInt {
    RectInt::new(
        round_to_int(rect.x * pixels_per_point),
        round_to_int(rect.y * pixels_per_point),
        round_to_int(rect.width * pixels_per_point),
        round_to_int(rect.height * pixels_per_point),
    )
}

// Half away from zero; `f32::round` needs std
fn round_to_int(value: f32) -> i32 {
    if value >= 0.0 {
        (value + 0.5) as i32
    } else {
        (value - 0.5) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scissor_stack_combines() {
        let mut params = DrawParams::new(None, None);
        let first = params.push_scissor(Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(first, Rect::new(0.0, 0.0, 100.0, 100.0));
        let second = params.push_scissor(Rect::new(50.0, 50.0, 100.0, 100.0));
        assert_eq!(second, Rect::new(50.0, 50.0, 50.0, 50.0));
        assert_eq!(params.pop_scissor(), first);
        assert_eq!(params.pop_scissor(), UNLIMITED_RECT);
        assert!(params.is_balanced());
    }

    #[test]
    #[should_panic(expected = "unbalanced scissor pop")]
    fn test_pop_base_scissor_panics() {
        let mut params = DrawParams::new(None, None);
        params.pop_scissor();
    }

    #[test]
    fn test_pixel_conversion_flips_y() {
        let viewport = RectInt::new(0, 0, 800, 600);
        let rect = Rect::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(
            points_to_pixels_flip_y(&rect, 1.0, &viewport),
            RectInt::new(10, 540, 30, 40)
        );
        assert_eq!(
            points_to_pixels_flip_y(&rect, 2.0, &viewport),
            RectInt::new(20, 480, 60, 80)
        );
        assert_eq!(points_to_pixels(&rect, 1.5), RectInt::new(15, 30, 45, 60));
    }

    #[test]
    fn test_unwind_returns_temporaries() {
        let mut params = DrawParams::new(None, Some(MaterialId(1)));
        params.push_render_texture(TextureId(7));
        params.push_render_texture(TextureId(8));
        params.push_default_material(Some(MaterialId(2)));
        assert_eq!(params.default_material(), Some(MaterialId(2)));
        assert_eq!(params.unwind(), vec![TextureId(7), TextureId(8)]);
        assert!(params.is_balanced());
        assert_eq!(params.default_material(), Some(MaterialId(1)));
        assert_eq!(params.render_target(), None);
    }
}
