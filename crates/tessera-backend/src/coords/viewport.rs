use super::Vec2;

/// Device viewport in whole pixels with a depth range.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Viewport {
    /// Builds a viewport from engine-level position and size.
    ///
    /// Components are truncated toward zero; negative values clamp to 0.
    /// Depth range is always `[0, 1]`.
    #[inline]
    pub fn from_pos_size(pos: Vec2, size: Vec2) -> Self {
        Self {
            x: pos.x as u32,
            y: pos.y as u32,
            width: size.x as u32,
            height: size.y as u32,
            min_z: 0.0,
            max_z: 1.0,
        }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            min_z: 0.0,
            max_z: 1.0,
        }
    }
}
