//! Rotation-aware compositing of the primary and cursor planes

use super::{ColorConversion, Renderer, Texture};
use crate::types::{Rotation, Vec2i};

/// Opaque black
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Move a cursor from pre-rotation screen space into the rotated capture
///
/// The trailing size subtractions are anchor fixups measured against the
/// drivers, not a rotation matrix. Keep the order of operations.
pub fn cursor_position(
    rotation: Rotation,
    capture_size: Vec2i,
    cursor_pos: Vec2i,
    cursor_size: Vec2i,
) -> Vec2i {
    let mut pos = cursor_pos;
    match rotation {
        Rotation::Deg0 => {}
        Rotation::Deg90 => {
            pos = pos.swapped();
            pos.x = capture_size.x - pos.x;
            pos.x -= cursor_size.x;
        }
        Rotation::Deg180 => {
            pos.x = capture_size.x - pos.x;
            pos.y = capture_size.y - pos.y;
            pos.x -= cursor_size.x;
            pos.y -= cursor_size.y;
        }
        Rotation::Deg270 => {
            pos = pos.swapped();
            pos.y = capture_size.y - pos.y;
            pos.y -= cursor_size.y;
        }
    }
    pos
}

/// One call into the color conversion stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub texture: Texture,
    pub dest_pos: Vec2i,
    pub dest_size: Vec2i,
    pub texture_pos: Vec2i,
    pub texture_size: Vec2i,
    pub rotation: f32,
    pub external: bool,
}

impl DrawCall {
    fn issue(&self, conversion: &mut dyn ColorConversion) {
        conversion.draw(
            self.texture,
            self.dest_pos,
            self.dest_size,
            self.texture_pos,
            self.texture_size,
            self.rotation,
            self.external,
        );
    }
}

/// Cursor plane placement in pre-rotation screen space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPlacement {
    pub texture: Texture,
    pub position: Vec2i,
    pub size: Vec2i,
}

/// Draws for one frame: the primary plane, then the cursor if any
#[derive(Debug, Clone, PartialEq)]
pub struct CompositePlan {
    pub primary: DrawCall,
    pub cursor: Option<DrawCall>,
}

impl CompositePlan {
    /// Plan the draws for a frame
    ///
    /// `capture_pos` is where the captured output starts inside the primary
    /// plane's texture and `capture_size` is the post-rotation output size.
    pub fn new(
        rotation: Rotation,
        primary_texture: Texture,
        capture_pos: Vec2i,
        capture_size: Vec2i,
        cursor: Option<CursorPlacement>,
    ) -> Self {
        let radians = rotation.radians();
        let primary = DrawCall {
            texture: primary_texture,
            dest_pos: Vec2i::default(),
            dest_size: capture_size,
            texture_pos: capture_pos,
            texture_size: capture_size,
            rotation: radians,
            external: primary_texture.target.is_external(),
        };

        let cursor = cursor.map(|cursor| DrawCall {
            texture: cursor.texture,
            dest_pos: cursor_position(rotation, capture_size, cursor.position, cursor.size),
            dest_size: cursor.size,
            texture_pos: Vec2i::default(),
            texture_size: cursor.size,
            rotation: radians,
            external: cursor.texture.target.is_external(),
        });

        Self { primary, cursor }
    }

    /// Draws in submission order
    pub fn draw_calls(&self) -> impl Iterator<Item = &DrawCall> {
        std::iter::once(&self.primary).chain(self.cursor.as_ref())
    }
}

/// Clear the destination and issue the planned draws
pub fn composite(renderer: &dyn Renderer, conversion: &mut dyn ColorConversion, plan: &CompositePlan) {
    renderer.clear(CLEAR_COLOR);
    for call in plan.draw_calls() {
        call.issue(conversion);
    }
}
