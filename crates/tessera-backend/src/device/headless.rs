//! CPU-memory device.
//!
//! Implements [`GraphicsDevice`] without a GPU: buffers live in host memory,
//! draws are validated but not rasterized, and every call is recorded so
//! callers can assert on the exact device traffic. Failures can be injected
//! one call at a time.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use crate::coords::{Color, ScissorRect, Viewport};
use crate::geometry::{PrimitiveType, VertexElement};

use super::{
    BackendError, BufferFlags, BufferHandle, GraphicsDevice, LayoutHandle, RenderState,
    VertexSource,
};

/// Byte pattern a discard lock leaves in device memory before the caller writes.
pub const DISCARD_FILL: u8 = 0xCD;

/// One recorded device call, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateBuffer { size: u64, flags: BufferFlags },
    LockForWrite { buffer: BufferHandle, offset: u64, size: u64 },
    LockForRead { buffer: BufferHandle, offset: u64, size: u64 },
    Unlock(BufferHandle),
    ReleaseBuffer(BufferHandle),
    CreateVertexLayout(Vec<VertexElement>),
    ReleaseVertexLayout(LayoutHandle),
    SetVertexLayout(LayoutHandle),
    SetVertexSource(Option<VertexSource>),
    Draw { primitive: PrimitiveType, start_vertex: u32, primitive_count: u32 },
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    SetRenderState { state: RenderState, enabled: bool },
    Clear(Color),
}

#[derive(Debug)]
struct HeadlessBuffer {
    bytes: Vec<u8>,
    flags: BufferFlags,
    locked: bool,
}

/// Failures armed for the next matching call.
#[derive(Debug, Default)]
struct Faults {
    allocation: bool,
    lock: bool,
    draw: bool,
}

#[derive(Debug)]
pub struct HeadlessDevice {
    next_id: u64,
    max_buffer_size: u64,

    buffers: HashMap<BufferHandle, HeadlessBuffer>,
    layouts: HashMap<LayoutHandle, Vec<VertexElement>>,

    bound_layout: Option<LayoutHandle>,
    vertex_source: Option<VertexSource>,
    viewport: Viewport,
    scissor: ScissorRect,
    render_states: HashSet<RenderState>,
    clear_color: Option<Color>,

    calls: Vec<DeviceCall>,
    faults: Faults,
}

impl HeadlessDevice {
    /// Largest allocation accepted by default (256 MiB, the common wgpu limit).
    pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 256 << 20;

    pub fn new() -> Self {
        Self::with_max_buffer_size(Self::DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Allocations larger than `max_buffer_size` bytes fail with `AllocationFailed`.
    pub fn with_max_buffer_size(max_buffer_size: u64) -> Self {
        Self {
            next_id: 1,
            max_buffer_size,
            buffers: HashMap::new(),
            layouts: HashMap::new(),
            bound_layout: None,
            vertex_source: None,
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
            render_states: HashSet::new(),
            clear_color: None,
            calls: Vec::new(),
            faults: Faults::default(),
        }
    }

    // ── fault injection ───────────────────────────────────────────────────

    /// Makes the next `create_buffer` fail.
    pub fn fail_next_allocation(&mut self) {
        self.faults.allocation = true;
    }

    /// Makes the next `lock_for_write` or `lock_for_read` fail.
    pub fn fail_next_lock(&mut self) {
        self.faults.lock = true;
    }

    /// Makes the next `draw` fail.
    pub fn fail_next_draw(&mut self) {
        self.faults.draw = true;
    }

    // ── inspection ────────────────────────────────────────────────────────

    /// Calls recorded since creation or the last [`take_calls`](Self::take_calls).
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    /// Draw calls among the recorded calls.
    pub fn draw_calls(&self) -> Vec<(PrimitiveType, u32, u32)> {
        self.calls
            .iter()
            .filter_map(|call| match *call {
                DeviceCall::Draw { primitive, start_vertex, primitive_count } => {
                    Some((primitive, start_vertex, primitive_count))
                }
                _ => None,
            })
            .collect()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn buffer_bytes(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.bytes.as_slice())
    }

    pub fn buffer_flags(&self, buffer: BufferHandle) -> Option<BufferFlags> {
        self.buffers.get(&buffer).map(|b| b.flags)
    }

    pub fn is_locked(&self, buffer: BufferHandle) -> bool {
        self.buffers.get(&buffer).is_some_and(|b| b.locked)
    }

    pub fn bound_layout(&self) -> Option<LayoutHandle> {
        self.bound_layout
    }

    pub fn layout_elements(&self, layout: LayoutHandle) -> Option<&[VertexElement]> {
        self.layouts.get(&layout).map(Vec::as_slice)
    }

    pub fn vertex_source(&self) -> Option<VertexSource> {
        self.vertex_source
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scissor_rect(&self) -> ScissorRect {
        self.scissor
    }

    pub fn render_state(&self, state: RenderState) -> bool {
        self.render_states.contains(&state)
    }

    /// Color of the most recent clear, if any.
    pub fn clear_color(&self) -> Option<Color> {
        self.clear_color
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_range(len: usize, offset: u64, size: u64) -> Result<Range<usize>, BackendError> {
    let end = offset
        .checked_add(size)
        .filter(|&end| end <= len as u64)
        .ok_or_else(|| {
            BackendError::LockFailed(format!(
                "range {offset}+{size} exceeds buffer of {len} bytes"
            ))
        })?;
    Ok(offset as usize..end as usize)
}

impl GraphicsDevice for HeadlessDevice {
    const NAME: &'static str = "Headless";
    const IDENTIFIER: &'static str = "headless";

    fn create_buffer(&mut self, size_bytes: u64, flags: BufferFlags) -> Result<BufferHandle, BackendError> {
        self.calls.push(DeviceCall::CreateBuffer { size: size_bytes, flags });

        if std::mem::take(&mut self.faults.allocation) {
            return Err(BackendError::AllocationFailed {
                size: size_bytes,
                reason: "injected allocation failure".into(),
            });
        }
        if size_bytes == 0 || size_bytes > self.max_buffer_size {
            return Err(BackendError::AllocationFailed {
                size: size_bytes,
                reason: format!("size must be within 1..={} bytes", self.max_buffer_size),
            });
        }

        let handle = BufferHandle(self.next_id());
        self.buffers.insert(
            handle,
            HeadlessBuffer {
                bytes: vec![0; size_bytes as usize],
                flags,
                locked: false,
            },
        );
        log::trace!("HeadlessDevice: buffer {} created ({size_bytes} bytes, {flags:?})", handle.0);
        Ok(handle)
    }

    fn lock_for_write(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<&mut [u8], BackendError> {
        self.calls.push(DeviceCall::LockForWrite { buffer, offset, size });

        if std::mem::take(&mut self.faults.lock) {
            return Err(BackendError::LockFailed("injected lock failure".into()));
        }

        let buf = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| BackendError::LockFailed(format!("unknown buffer {}", buffer.0)))?;
        if buf.locked {
            return Err(BackendError::LockFailed(format!("buffer {} is already locked", buffer.0)));
        }
        let range = lock_range(buf.bytes.len(), offset, size)?;

        // Discard: the previous generation is gone.
        buf.bytes.fill(DISCARD_FILL);
        buf.locked = true;
        Ok(&mut buf.bytes[range])
    }

    fn lock_for_read(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<&[u8], BackendError> {
        self.calls.push(DeviceCall::LockForRead { buffer, offset, size });

        if std::mem::take(&mut self.faults.lock) {
            return Err(BackendError::LockFailed("injected lock failure".into()));
        }

        let buf = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| BackendError::LockFailed(format!("unknown buffer {}", buffer.0)))?;
        if buf.locked {
            return Err(BackendError::LockFailed(format!("buffer {} is already locked", buffer.0)));
        }
        let range = lock_range(buf.bytes.len(), offset, size)?;

        buf.locked = true;
        Ok(&buf.bytes[range])
    }

    fn unlock(&mut self, buffer: BufferHandle) {
        self.calls.push(DeviceCall::Unlock(buffer));

        match self.buffers.get_mut(&buffer) {
            Some(buf) => buf.locked = false,
            None => log::warn!("HeadlessDevice: unlock of unknown buffer {}", buffer.0),
        }
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        self.calls.push(DeviceCall::ReleaseBuffer(buffer));

        if self.buffers.remove(&buffer).is_none() {
            log::warn!("HeadlessDevice: release of unknown buffer {}", buffer.0);
        }
        if self.vertex_source.is_some_and(|s| s.buffer == buffer) {
            self.vertex_source = None;
        }
    }

    fn create_vertex_layout(&mut self, elements: &[VertexElement]) -> Result<LayoutHandle, BackendError> {
        self.calls.push(DeviceCall::CreateVertexLayout(elements.to_vec()));

        if elements.is_empty() {
            return Err(BackendError::LayoutFailed("layout has no elements".into()));
        }

        let handle = LayoutHandle(self.next_id());
        self.layouts.insert(handle, elements.to_vec());
        Ok(handle)
    }

    fn release_vertex_layout(&mut self, layout: LayoutHandle) {
        self.calls.push(DeviceCall::ReleaseVertexLayout(layout));

        if self.layouts.remove(&layout).is_none() {
            log::warn!("HeadlessDevice: release of unknown layout {}", layout.0);
        }
        if self.bound_layout == Some(layout) {
            self.bound_layout = None;
        }
    }

    fn set_vertex_layout(&mut self, layout: LayoutHandle) {
        self.calls.push(DeviceCall::SetVertexLayout(layout));
        self.bound_layout = Some(layout);
    }

    fn set_vertex_source(&mut self, source: Option<VertexSource>) {
        self.calls.push(DeviceCall::SetVertexSource(source));
        self.vertex_source = source;
    }

    fn draw(
        &mut self,
        primitive: PrimitiveType,
        start_vertex: u32,
        primitive_count: u32,
    ) -> Result<(), BackendError> {
        self.calls.push(DeviceCall::Draw { primitive, start_vertex, primitive_count });

        if std::mem::take(&mut self.faults.draw) {
            return Err(BackendError::DrawFailed("injected draw failure".into()));
        }

        if !self.bound_layout.is_some_and(|l| self.layouts.contains_key(&l)) {
            return Err(BackendError::DrawFailed("no vertex layout bound".into()));
        }
        let source = self
            .vertex_source
            .ok_or_else(|| BackendError::DrawFailed("no vertex source bound".into()))?;
        let buf = self
            .buffers
            .get(&source.buffer)
            .ok_or_else(|| BackendError::DrawFailed(format!("vertex source {} released", source.buffer.0)))?;
        if buf.locked {
            return Err(BackendError::DrawFailed(format!("vertex source {} is locked", source.buffer.0)));
        }

        let vertices = start_vertex as u64
            + primitive_count as u64 * primitive.vertices_per_primitive() as u64;
        let needed = vertices * source.stride as u64;
        if needed > buf.bytes.len() as u64 {
            return Err(BackendError::DrawFailed(format!(
                "draw reads {needed} bytes from a {} byte buffer",
                buf.bytes.len()
            )));
        }
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), BackendError> {
        self.calls.push(DeviceCall::SetViewport(viewport));
        self.viewport = viewport;
        Ok(())
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) -> Result<(), BackendError> {
        self.calls.push(DeviceCall::SetScissorRect(rect));
        self.scissor = rect;
        Ok(())
    }

    fn set_render_state(&mut self, state: RenderState, enabled: bool) -> Result<(), BackendError> {
        self.calls.push(DeviceCall::SetRenderState { state, enabled });
        if enabled {
            self.render_states.insert(state);
        } else {
            self.render_states.remove(&state);
        }
        Ok(())
    }

    fn clear(&mut self, color: Color) -> Result<(), BackendError> {
        self.calls.push(DeviceCall::Clear(color));
        self.clear_color = Some(color);
        Ok(())
    }
}
