use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::device::{BackendError, BufferFlags, BufferHandle, DeviceContext, GraphicsDevice, VertexSource};

use super::{BufferUsageHint, PrimitiveType, Vertex, VERTEX_STRIDE};

/// Device allocation owned by a [`GeometryBuffer`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct NativeBuffer {
    handle: BufferHandle,
    /// Vertices the allocation holds.
    capacity: usize,
}

/// Growable vertex buffer backed by fixed-size device memory.
///
/// The logical vertex count and the physical capacity are tracked separately:
/// uploads that fit reuse the allocation, larger ones replace it with one of
/// exactly the new size. The allocation is created on the first non-empty
/// upload and released exactly once, by [`destroy`](Self::destroy) or on drop.
///
/// The buffer only holds a weak reference to its device context. Once the
/// backend shuts down, device-facing calls report
/// [`BackendError::DeviceUnavailable`].
pub struct GeometryBuffer<D: GraphicsDevice> {
    device: Weak<RefCell<DeviceContext<D>>>,
    native: Option<NativeBuffer>,
    vertex_count: usize,
    primitive_type: PrimitiveType,
    usage_hint: BufferUsageHint,
}

impl<D: GraphicsDevice> GeometryBuffer<D> {
    /// Creates an empty buffer bound to `device`. Allocates nothing.
    pub fn create(device: Weak<RefCell<DeviceContext<D>>>) -> Result<Self, BackendError> {
        if device.strong_count() == 0 {
            log::error!("GeometryBuffer: no graphics device to create on");
            return Err(BackendError::DeviceUnavailable);
        }

        Ok(Self {
            device,
            native: None,
            vertex_count: 0,
            primitive_type: PrimitiveType::default(),
            usage_hint: BufferUsageHint::default(),
        })
    }

    // ── accessors ─────────────────────────────────────────────────────────

    /// Logical vertex count of the last upload.
    pub fn len(&self) -> usize {
        self.vertex_count
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive_type
    }

    pub fn usage_hint(&self) -> BufferUsageHint {
        self.usage_hint
    }

    /// Vertices the current allocation can hold; 0 when unallocated.
    pub fn capacity(&self) -> usize {
        self.native.map_or(0, |n| n.capacity)
    }

    pub fn is_allocated(&self) -> bool {
        self.native.is_some()
    }

    /// Whole primitives in the uploaded vertices; a trailing partial one is dropped.
    pub fn primitive_count(&self) -> usize {
        self.primitive_type.primitive_count(self.vertex_count)
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    /// Releases the device allocation, if any. Idempotent.
    pub fn destroy(&mut self) {
        let Some(native) = self.native.take() else {
            return;
        };

        match self.device.upgrade() {
            Some(ctx) => {
                ctx.borrow_mut().device_mut().release_buffer(native.handle);
                log::trace!("GeometryBuffer: released buffer {}", native.handle.raw());
            }
            // Device memory went away with the device.
            None => log::debug!("GeometryBuffer: device gone, buffer {} dropped", native.handle.raw()),
        }
    }

    /// Replaces the contents with `vertices`.
    ///
    /// The vertex count, primitive type and usage hint are updated before any
    /// device work. An empty upload keeps the allocation and touches nothing.
    ///
    /// If no allocation can be made the buffer is left unallocated with a
    /// vertex count of 0. If the write lock fails the allocation is kept and
    /// its contents are unspecified.
    pub fn upload(
        &mut self,
        vertices: &[Vertex],
        primitive_type: PrimitiveType,
        usage_hint: BufferUsageHint,
    ) -> Result<(), BackendError> {
        if let Some(native) = self.native
            && vertices.len() > native.capacity
        {
            log::warn!(
                "GeometryBuffer: {} vertices exceed capacity {}, reallocating",
                vertices.len(),
                native.capacity
            );
            self.destroy();
        }

        self.vertex_count = vertices.len();
        self.primitive_type = primitive_type;
        self.usage_hint = usage_hint;

        if vertices.is_empty() {
            return Ok(());
        }

        let Some(ctx) = self.device.upgrade() else {
            log::error!("GeometryBuffer: upload of {} vertices without a device", vertices.len());
            self.native = None;
            self.vertex_count = 0;
            return Err(BackendError::DeviceUnavailable);
        };
        let mut ctx = ctx.borrow_mut();
        let device = ctx.device_mut();

        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as u64;

        let native = match self.native {
            Some(native) => native,
            None => {
                let mut flags = BufferFlags::WRITE_ONLY;
                if usage_hint.is_dynamic() {
                    flags |= BufferFlags::DYNAMIC;
                }

                match device.create_buffer(size, flags) {
                    Ok(handle) => {
                        log::trace!("GeometryBuffer: allocated buffer {} ({size} bytes)", handle.raw());
                        let native = NativeBuffer {
                            handle,
                            capacity: vertices.len(),
                        };
                        self.native = Some(native);
                        native
                    }
                    Err(err) => {
                        log::error!("GeometryBuffer: {err}");
                        self.vertex_count = 0;
                        return Err(err);
                    }
                }
            }
        };

        match device.lock_for_write(native.handle, 0, size) {
            Ok(dst) => dst.copy_from_slice(bytes),
            Err(err) => {
                log::error!("GeometryBuffer: {err}");
                return Err(err);
            }
        }
        device.unlock(native.handle);
        Ok(())
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Draws every whole primitive from vertex 0.
    ///
    /// Does nothing, without touching the device, when the buffer holds no
    /// drawable data.
    pub fn draw(&self) -> Result<(), BackendError> {
        if !self.is_drawable() {
            return Ok(());
        }

        let ctx = self.context()?;
        let mut ctx = ctx.borrow_mut();
        self.bind_on(&mut ctx)?;

        let count = u32::try_from(self.primitive_count()).map_err(|_| {
            BackendError::DrawFailed(format!("{} primitives exceed a single draw", self.primitive_count()))
        })?;

        ctx.device_mut()
            .draw(self.primitive_type, 0, count)
            .inspect_err(|err| log::error!("GeometryBuffer: {err}"))
    }

    /// Binds the shared vertex layout and this buffer as the vertex source.
    ///
    /// No-op when the buffer holds no drawable data.
    pub fn bind(&self) -> Result<(), BackendError> {
        if !self.is_drawable() {
            return Ok(());
        }
        let ctx = self.context()?;
        let mut ctx = ctx.borrow_mut();
        self.bind_on(&mut ctx)
    }

    /// Clears the device vertex source.
    pub fn unbind(&self) -> Result<(), BackendError> {
        let ctx = self.context()?;
        ctx.borrow_mut().device_mut().set_vertex_source(None);
        Ok(())
    }

    // ── readback ──────────────────────────────────────────────────────────

    /// Copies the uploaded vertices back from device memory.
    ///
    /// Empty when nothing is allocated or the vertex count is 0.
    pub fn download(&self) -> Result<Vec<Vertex>, BackendError> {
        let Some(native) = self.native else {
            return Ok(Vec::new());
        };
        if self.vertex_count == 0 {
            return Ok(Vec::new());
        }

        let ctx = self.context()?;
        let mut ctx = ctx.borrow_mut();
        let device = ctx.device_mut();

        let size = self.vertex_count as u64 * VERTEX_STRIDE as u64;
        let vertices = match device.lock_for_read(native.handle, 0, size) {
            Ok(src) => src
                .chunks_exact(VERTEX_STRIDE as usize)
                .map(bytemuck::pod_read_unaligned::<Vertex>)
                .collect(),
            Err(err) => {
                log::error!("GeometryBuffer: {err}");
                return Err(err);
            }
        };
        device.unlock(native.handle);
        Ok(vertices)
    }

    fn is_drawable(&self) -> bool {
        self.native.is_some() && self.vertex_count > 0
    }

    fn context(&self) -> Result<Rc<RefCell<DeviceContext<D>>>, BackendError> {
        self.device.upgrade().ok_or_else(|| {
            log::error!("GeometryBuffer: graphics device is gone");
            BackendError::DeviceUnavailable
        })
    }

    fn bind_on(&self, ctx: &mut DeviceContext<D>) -> Result<(), BackendError> {
        let Some(native) = self.native else {
            return Ok(());
        };

        let layout = ctx.vertex_layout()?;
        let device = ctx.device_mut();
        device.set_vertex_layout(layout);
        device.set_vertex_source(Some(VertexSource {
            buffer: native.handle,
            stride: VERTEX_STRIDE,
        }));
        Ok(())
    }
}

impl<D: GraphicsDevice> Drop for GeometryBuffer<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Color;
    use crate::device::{DeviceCall, HeadlessDevice, SharedContext};

    fn context() -> SharedContext<HeadlessDevice> {
        DeviceContext::new(HeadlessDevice::new()).into_shared()
    }

    fn buffer(ctx: &SharedContext<HeadlessDevice>) -> GeometryBuffer<HeadlessDevice> {
        GeometryBuffer::create(Rc::downgrade(ctx)).unwrap()
    }

    fn vertices(n: usize) -> Vec<Vertex> {
        (0..n)
            .map(|i| {
                let f = i as f32;
                Vertex::new([f, f + 0.5, 0.0], [f / 10.0, 1.0], [0.0, 0.0, 1.0], Color::new(i as u8, 2, 3, 255))
            })
            .collect()
    }

    fn calls(ctx: &SharedContext<HeadlessDevice>) -> Vec<DeviceCall> {
        ctx.borrow_mut().device_mut().take_calls()
    }

    fn created_sizes(calls: &[DeviceCall]) -> Vec<u64> {
        calls
            .iter()
            .filter_map(|c| match c {
                DeviceCall::CreateBuffer { size, .. } => Some(*size),
                _ => None,
            })
            .collect()
    }

    // ── create / destroy ──────────────────────────────────────────────────

    #[test]
    fn create_without_device_fails() {
        let ctx = context();
        let weak = Rc::downgrade(&ctx);
        drop(ctx);

        let err = GeometryBuffer::<HeadlessDevice>::create(weak).err();
        assert_eq!(err, Some(BackendError::DeviceUnavailable));
        assert!(GeometryBuffer::<HeadlessDevice>::create(Weak::new()).is_err());
    }

    #[test]
    fn create_allocates_nothing() {
        let ctx = context();
        let buf = buffer(&ctx);

        assert!(!buf.is_allocated());
        assert_eq!(buf.capacity(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.primitive_type(), PrimitiveType::Triangles);
        assert_eq!(buf.usage_hint(), BufferUsageHint::Static);
        assert!(calls(&ctx).is_empty());
    }

    #[test]
    fn double_destroy_releases_once() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        calls(&ctx);

        buf.destroy();
        buf.destroy();

        assert_eq!(calls(&ctx), vec![DeviceCall::ReleaseBuffer(BufferHandle(1))]);
        assert!(!buf.is_allocated());
        assert_eq!(buf.capacity(), 0);
        assert_eq!(ctx.borrow().device().live_buffer_count(), 0);
    }

    #[test]
    fn drop_releases_allocation() {
        let ctx = context();
        {
            let mut buf = buffer(&ctx);
            buf.upload(&vertices(6), PrimitiveType::Lines, BufferUsageHint::Static).unwrap();
            assert_eq!(ctx.borrow().device().live_buffer_count(), 1);
        }
        assert_eq!(ctx.borrow().device().live_buffer_count(), 0);
    }

    #[test]
    fn drop_after_device_is_gone() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        drop(ctx);
        drop(buf);
    }

    // ── upload ────────────────────────────────────────────────────────────

    #[test]
    fn three_triangles() {
        let ctx = context();
        let mut buf = buffer(&ctx);

        buf.upload(&vertices(9), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();

        assert_eq!(buf.len(), 9);
        assert_eq!(buf.capacity(), 9);
        assert_eq!(buf.primitive_count(), 3);

        let log = calls(&ctx);
        assert_eq!(
            log,
            vec![
                DeviceCall::CreateBuffer { size: 9 * 36, flags: BufferFlags::WRITE_ONLY },
                DeviceCall::LockForWrite { buffer: BufferHandle(1), offset: 0, size: 9 * 36 },
                DeviceCall::Unlock(BufferHandle(1)),
            ]
        );

        buf.draw().unwrap();
        assert_eq!(ctx.borrow().device().draw_calls(), vec![(PrimitiveType::Triangles, 0, 3)]);
    }

    #[test]
    fn upload_within_capacity_reuses_allocation() {
        let ctx = context();
        let mut buf = buffer(&ctx);

        buf.upload(&vertices(10), PrimitiveType::Lines, BufferUsageHint::Static).unwrap();
        calls(&ctx);
        buf.upload(&vertices(4), PrimitiveType::Lines, BufferUsageHint::Static).unwrap();

        let log = calls(&ctx);
        assert!(created_sizes(&log).is_empty());
        assert!(!log.iter().any(|c| matches!(c, DeviceCall::ReleaseBuffer(_))));
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.primitive_count(), 2);

        buf.draw().unwrap();
        assert_eq!(ctx.borrow().device().draw_calls(), vec![(PrimitiveType::Lines, 0, 2)]);
    }

    #[test]
    fn upload_above_capacity_reallocates_exactly() {
        let ctx = context();
        let mut buf = buffer(&ctx);

        buf.upload(&vertices(4), PrimitiveType::Points, BufferUsageHint::Static).unwrap();
        calls(&ctx);
        buf.upload(&vertices(10), PrimitiveType::Points, BufferUsageHint::Static).unwrap();

        let log = calls(&ctx);
        assert_eq!(log[0], DeviceCall::ReleaseBuffer(BufferHandle(1)));
        assert_eq!(created_sizes(&log), vec![360]);
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.len(), 10);
        assert_eq!(ctx.borrow().device().live_buffer_count(), 1);
    }

    #[test]
    fn zero_vertices_touch_nothing() {
        let ctx = context();
        let mut buf = buffer(&ctx);

        buf.upload(&[], PrimitiveType::Lines, BufferUsageHint::Dynamic).unwrap();
        buf.draw().unwrap();

        assert!(calls(&ctx).is_empty());
        assert!(!buf.is_allocated());
        assert_eq!(buf.primitive_type(), PrimitiveType::Lines);
        assert_eq!(buf.usage_hint(), BufferUsageHint::Dynamic);
        assert_eq!(buf.primitive_count(), 0);
        assert!(buf.download().unwrap().is_empty());
    }

    #[test]
    fn empty_upload_keeps_allocation() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(6), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        calls(&ctx);

        buf.upload(&[], PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        buf.draw().unwrap();

        assert!(calls(&ctx).is_empty());
        assert!(buf.is_allocated());
        assert_eq!(buf.capacity(), 6);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn dynamic_hints_request_dynamic_allocation() {
        for hint in [BufferUsageHint::Dynamic, BufferUsageHint::Stream] {
            let ctx = context();
            let mut buf = buffer(&ctx);
            buf.upload(&vertices(2), PrimitiveType::Lines, hint).unwrap();

            let log = calls(&ctx);
            assert_eq!(
                log[0],
                DeviceCall::CreateBuffer { size: 72, flags: BufferFlags::WRITE_ONLY | BufferFlags::DYNAMIC }
            );
        }
    }

    #[test]
    fn allocation_failure_leaves_buffer_empty() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        ctx.borrow_mut().device_mut().fail_next_allocation();

        let err = buf.upload(&vertices(9), PrimitiveType::Triangles, BufferUsageHint::Static);
        assert!(matches!(err, Err(BackendError::AllocationFailed { size: 324, .. })));
        assert!(!buf.is_allocated());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.primitive_count(), 0);
        calls(&ctx);

        buf.draw().unwrap();
        assert!(calls(&ctx).is_empty());

        buf.upload(&vertices(9), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        assert_eq!(buf.capacity(), 9);
    }

    #[test]
    fn oversized_upload_fails_allocation() {
        let ctx = DeviceContext::new(HeadlessDevice::with_max_buffer_size(100)).into_shared();
        let mut buf = buffer(&ctx);

        let err = buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static);
        assert!(matches!(err, Err(BackendError::AllocationFailed { .. })));
        assert!(!buf.is_allocated());
    }

    #[test]
    fn lock_failure_keeps_allocation() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        ctx.borrow_mut().device_mut().fail_next_lock();

        let err = buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static);
        assert!(matches!(err, Err(BackendError::LockFailed(_))));
        assert!(buf.is_allocated());
        assert_eq!(buf.len(), 3);
        assert!(!ctx.borrow().device().is_locked(BufferHandle(1)));

        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        assert_eq!(buf.download().unwrap(), vertices(3));
    }

    #[test]
    fn upload_without_device_clears_state() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        drop(ctx);

        let err = buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static);
        assert_eq!(err, Err(BackendError::DeviceUnavailable));
        assert!(!buf.is_allocated());
        assert_eq!(buf.len(), 0);
    }

    // ── draw / bind ───────────────────────────────────────────────────────

    #[test]
    fn draw_before_upload_makes_no_device_calls() {
        let ctx = context();
        let buf = buffer(&ctx);

        buf.draw().unwrap();
        buf.bind().unwrap();

        assert!(calls(&ctx).is_empty());
        assert!(!ctx.borrow().has_vertex_layout());
    }

    #[test]
    fn draw_binds_layout_and_source() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(4), PrimitiveType::Lines, BufferUsageHint::Static).unwrap();
        calls(&ctx);

        buf.draw().unwrap();

        let log = calls(&ctx);
        assert!(matches!(log[0], DeviceCall::CreateVertexLayout(ref e) if e == &crate::geometry::VERTEX_ELEMENTS));
        assert!(matches!(log[1], DeviceCall::SetVertexLayout(_)));
        assert_eq!(
            log[2],
            DeviceCall::SetVertexSource(Some(VertexSource { buffer: BufferHandle(1), stride: 36 }))
        );
        assert_eq!(
            log[3],
            DeviceCall::Draw { primitive: PrimitiveType::Lines, start_vertex: 0, primitive_count: 2 }
        );
    }

    #[test]
    fn vertex_layout_is_shared_between_buffers() {
        let ctx = context();
        let mut a = buffer(&ctx);
        let mut b = buffer(&ctx);
        a.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        b.upload(&vertices(2), PrimitiveType::Points, BufferUsageHint::Static).unwrap();

        a.draw().unwrap();
        b.draw().unwrap();
        a.draw().unwrap();

        let log = calls(&ctx);
        let layouts = log.iter().filter(|c| matches!(c, DeviceCall::CreateVertexLayout(_))).count();
        assert_eq!(layouts, 1);
        assert_eq!(ctx.borrow().device().live_layout_count(), 1);
    }

    #[test]
    fn partial_primitive_is_not_drawn() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(5), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();

        buf.draw().unwrap();
        assert_eq!(ctx.borrow().device().draw_calls(), vec![(PrimitiveType::Triangles, 0, 1)]);
    }

    #[test]
    fn draw_failure_is_reported_and_recoverable() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();

        ctx.borrow_mut().device_mut().fail_next_draw();
        assert!(matches!(buf.draw(), Err(BackendError::DrawFailed(_))));
        assert!(buf.draw().is_ok());
    }

    #[test]
    fn draw_without_device_is_unavailable() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        drop(ctx);

        assert_eq!(buf.draw(), Err(BackendError::DeviceUnavailable));
        assert_eq!(buf.unbind(), Err(BackendError::DeviceUnavailable));
    }

    #[test]
    fn unbind_clears_vertex_source() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();

        buf.bind().unwrap();
        assert!(ctx.borrow().device().vertex_source().is_some());

        buf.unbind().unwrap();
        assert_eq!(ctx.borrow().device().vertex_source(), None);
    }

    // ── download ──────────────────────────────────────────────────────────

    #[test]
    fn upload_then_download_round_trips() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        let data = vertices(7);

        buf.upload(&data, PrimitiveType::Points, BufferUsageHint::Stream).unwrap();
        assert_eq!(buf.download().unwrap(), data);
    }

    #[test]
    fn download_returns_only_logical_vertices() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(10), PrimitiveType::Lines, BufferUsageHint::Static).unwrap();

        let second: Vec<Vertex> = vertices(14).split_off(10);
        buf.upload(&second, PrimitiveType::Lines, BufferUsageHint::Static).unwrap();
        calls(&ctx);

        assert_eq!(buf.download().unwrap(), second);
        assert_eq!(
            calls(&ctx)[0],
            DeviceCall::LockForRead { buffer: BufferHandle(1), offset: 0, size: 4 * 36 }
        );
    }

    #[test]
    fn download_lock_failure_is_an_error() {
        let ctx = context();
        let mut buf = buffer(&ctx);
        buf.upload(&vertices(3), PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();

        ctx.borrow_mut().device_mut().fail_next_lock();
        assert!(matches!(buf.download(), Err(BackendError::LockFailed(_))));
        assert_eq!(buf.download().unwrap(), vertices(3));
    }
}
