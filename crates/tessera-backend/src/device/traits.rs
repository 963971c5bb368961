use crate::coords::{Color, ScissorRect, Viewport};
use crate::geometry::{PrimitiveType, VertexElement};

use super::BackendError;

/// Opaque handle to a device buffer allocation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Opaque handle to a registered vertex layout declaration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutHandle(pub(crate) u64);

impl BufferHandle {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl LayoutHandle {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

bitflags::bitflags! {
    /// Allocation flags for [`GraphicsDevice::create_buffer`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        /// The CPU only writes the buffer; reads may be slow.
        const WRITE_ONLY = 1 << 0;
        /// Contents are replaced frequently (discard locks every frame).
        const DYNAMIC = 1 << 1;
    }
}

/// Buffer bound as the active vertex stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VertexSource {
    pub buffer: BufferHandle,
    /// Bytes between consecutive vertices.
    pub stride: u32,
}

/// Toggleable fixed-function render state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderState {
    ScissorTest,
    AlphaBlend,
}

/// Native device boundary.
///
/// Mirrors an immediate-mode device object: lockable fixed-size buffers, a
/// single bound vertex layout and vertex stream, and draw calls counted in
/// primitives. Devices are driven from one rendering thread.
///
/// A lock returns a view into device-visible memory that stays valid until
/// [`unlock`](Self::unlock) is called for the same buffer. Write locks discard:
/// bytes outside the written range are unspecified afterwards, and draws
/// issued before the lock keep seeing the previous contents.
pub trait GraphicsDevice {
    /// Human readable backend name.
    const NAME: &'static str;
    /// Short stable identifier.
    const IDENTIFIER: &'static str;

    fn create_buffer(&mut self, size_bytes: u64, flags: BufferFlags) -> Result<BufferHandle, BackendError>;

    fn lock_for_write(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<&mut [u8], BackendError>;

    fn lock_for_read(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<&[u8], BackendError>;

    fn unlock(&mut self, buffer: BufferHandle);

    fn release_buffer(&mut self, buffer: BufferHandle);

    fn create_vertex_layout(&mut self, elements: &[VertexElement]) -> Result<LayoutHandle, BackendError>;

    fn release_vertex_layout(&mut self, layout: LayoutHandle);

    fn set_vertex_layout(&mut self, layout: LayoutHandle);

    /// Binds `source` as stream 0, or unbinds it with `None`.
    fn set_vertex_source(&mut self, source: Option<VertexSource>);

    /// Draws `primitive_count` primitives starting at vertex `start_vertex`
    /// of the bound stream.
    fn draw(
        &mut self,
        primitive: PrimitiveType,
        start_vertex: u32,
        primitive_count: u32,
    ) -> Result<(), BackendError>;

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), BackendError>;

    fn set_scissor_rect(&mut self, rect: ScissorRect) -> Result<(), BackendError>;

    fn set_render_state(&mut self, state: RenderState, enabled: bool) -> Result<(), BackendError>;

    /// Clears the current render target to `color`.
    fn clear(&mut self, color: Color) -> Result<(), BackendError>;
}
