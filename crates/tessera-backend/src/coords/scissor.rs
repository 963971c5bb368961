use super::Vec2;

/// Device scissor rectangle as edges in whole pixels.
///
/// `right` and `bottom` are exclusive.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    #[inline]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Builds edges from an engine-level start point and size.
    ///
    /// Each edge is truncated independently, so `right` is `trunc(x + w)`,
    /// not `trunc(x) + trunc(w)`.
    #[inline]
    pub fn from_start_size(start: Vec2, size: Vec2) -> Self {
        Self {
            left: start.x as i32,
            top: start.y as i32,
            right: (start.x + size.x) as i32,
            bottom: (start.y + size.y) as i32,
        }
    }

    #[inline]
    pub fn width(self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    #[inline]
    pub fn height(self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamps to a `target_width` × `target_height` surface and returns
    /// `(x, y, w, h)`, or `None` when nothing of the rect remains.
    pub fn clamped_to(self, target_width: u32, target_height: u32) -> Option<(u32, u32, u32, u32)> {
        let tw = target_width as i64;
        let th = target_height as i64;

        let x0 = (self.left as i64).clamp(0, tw);
        let y0 = (self.top as i64).clamp(0, th);
        let x1 = (self.right as i64).clamp(0, tw);
        let y1 = (self.bottom as i64).clamp(0, th);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}
