use std::rc::Rc;

use crate::coords::{Color, ScissorRect, Vec2, Viewport};
use crate::device::{BackendError, DeviceContext, GraphicsDevice, RenderState, SharedContext};
use crate::geometry::GeometryBuffer;

bitflags::bitflags! {
    /// Optional pipeline features toggled by the engine.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct BackendFeatures: u32 {
        const SCISSOR_TEST = 1 << 0;
        const ALPHA_BLENDING = 1 << 1;
    }
}

/// Engine-facing backend over a single device.
///
/// Translates engine state (float viewports, scissor boxes, feature masks,
/// colors) into device calls and hands out [`GeometryBuffer`]s bound to the
/// device context. The backend holds the only strong reference to that
/// context; [`shutdown`](Self::shutdown) tears it down and leaves outstanding
/// buffers reporting [`BackendError::DeviceUnavailable`].
pub struct Backend<D: GraphicsDevice> {
    context: Option<SharedContext<D>>,
    active_features: BackendFeatures,
}

impl<D: GraphicsDevice> Backend<D> {
    pub fn new(device: D) -> Self {
        Self {
            context: Some(DeviceContext::new(device).into_shared()),
            active_features: BackendFeatures::empty(),
        }
    }

    /// A backend without a device. Every device-facing call fails.
    pub fn detached() -> Self {
        Self {
            context: None,
            active_features: BackendFeatures::empty(),
        }
    }

    pub fn initialize(&mut self) -> Result<(), BackendError> {
        self.context("initialize")?;
        log::info!("Backend: {} backend initialized", D::NAME);
        Ok(())
    }

    /// Releases shared device resources and drops the device. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(ctx) = self.context.take() {
            ctx.borrow_mut().teardown();
            log::info!("Backend: {} backend shut down", D::NAME);
        }
        self.active_features = BackendFeatures::empty();
    }

    pub fn name(&self) -> &'static str {
        D::NAME
    }

    pub fn identifier(&self) -> &'static str {
        D::IDENTIFIER
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    // ── state ─────────────────────────────────────────────────────────────

    /// Sets the viewport from engine pixels. Components truncate toward zero.
    pub fn set_viewport(&mut self, pos: Vec2, size: Vec2) -> Result<(), BackendError> {
        let viewport = Viewport::from_pos_size(pos, size);
        self.device_call("set viewport", |device| device.set_viewport(viewport))
    }

    /// Sets the scissor box and turns the scissor test on.
    pub fn set_scissor(&mut self, start: Vec2, size: Vec2) -> Result<(), BackendError> {
        let rect = ScissorRect::from_start_size(start, size);
        self.device_call("set scissor", |device| {
            device.set_scissor_rect(rect)?;
            device.set_render_state(RenderState::ScissorTest, true)
        })?;

        self.active_features |= BackendFeatures::SCISSOR_TEST;
        Ok(())
    }

    pub fn clear(&mut self, color: Color) -> Result<(), BackendError> {
        self.device_call("clear", |device| device.clear(color))
    }

    // ── features ──────────────────────────────────────────────────────────

    pub fn enable_features(&mut self, features: BackendFeatures) -> Result<(), BackendError> {
        self.device_call("enable features", |device| {
            if features.contains(BackendFeatures::SCISSOR_TEST) {
                device.set_render_state(RenderState::ScissorTest, true)?;
            }
            if features.contains(BackendFeatures::ALPHA_BLENDING) {
                device.set_render_state(RenderState::AlphaBlend, true)?;
            }
            Ok(())
        })?;

        self.active_features |= features;
        Ok(())
    }

    /// Turns off requested features. Device state is only touched for
    /// features that are currently active.
    pub fn disable_features(&mut self, features: BackendFeatures) -> Result<(), BackendError> {
        let turning_off = features & self.active_features;
        self.device_call("disable features", |device| {
            if turning_off.contains(BackendFeatures::SCISSOR_TEST) {
                device.set_render_state(RenderState::ScissorTest, false)?;
            }
            if turning_off.contains(BackendFeatures::ALPHA_BLENDING) {
                device.set_render_state(RenderState::AlphaBlend, false)?;
            }
            Ok(())
        })?;

        self.active_features.remove(features);
        Ok(())
    }

    pub fn active_features(&self) -> BackendFeatures {
        self.active_features
    }

    // ── resources ─────────────────────────────────────────────────────────

    pub fn create_geometry_buffer(&self) -> Result<GeometryBuffer<D>, BackendError> {
        let ctx = self.context("create geometry buffer")?;
        GeometryBuffer::create(Rc::downgrade(ctx))
    }

    /// Runs `f` against the device, e.g. to flush or inspect it.
    pub fn with_device<R>(&self, action: &str, f: impl FnOnce(&mut D) -> R) -> Result<R, BackendError> {
        let ctx = self.context(action)?;
        let mut ctx = ctx.borrow_mut();
        Ok(f(ctx.device_mut()))
    }

    fn device_call(
        &self,
        action: &str,
        f: impl FnOnce(&mut D) -> Result<(), BackendError>,
    ) -> Result<(), BackendError> {
        self.with_device(action, f)?
            .inspect_err(|err| log::error!("Backend: failed to {action}: {err}"))
    }

    fn context(&self, action: &str) -> Result<&SharedContext<D>, BackendError> {
        self.context.as_ref().ok_or_else(|| {
            log::error!("Backend: cannot {action}, device is not initialized");
            BackendError::DeviceUnavailable
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, HeadlessDevice};
    use crate::geometry::{BufferUsageHint, PrimitiveType, Vertex};

    fn backend() -> Backend<HeadlessDevice> {
        let mut backend = Backend::new(HeadlessDevice::new());
        backend.initialize().unwrap();
        backend
    }

    fn calls(backend: &Backend<HeadlessDevice>) -> Vec<DeviceCall> {
        backend.with_device("test", |d| d.take_calls()).unwrap()
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[test]
    fn names_come_from_device() {
        let backend = backend();
        assert_eq!(backend.name(), "Headless");
        assert_eq!(backend.identifier(), "headless");
    }

    #[test]
    fn detached_backend_reports_unavailable() {
        let mut backend = Backend::<HeadlessDevice>::detached();

        assert_eq!(backend.initialize(), Err(BackendError::DeviceUnavailable));
        assert_eq!(backend.clear(Color::black()), Err(BackendError::DeviceUnavailable));
        assert_eq!(
            backend.set_viewport(Vec2::zero(), Vec2::new(10.0, 10.0)),
            Err(BackendError::DeviceUnavailable)
        );
        assert!(backend.create_geometry_buffer().is_err());
        assert!(!backend.is_initialized());
    }

    #[test]
    fn shutdown_orphans_buffers() {
        let mut backend = backend();
        let mut buf = backend.create_geometry_buffer().unwrap();
        let verts = [Vertex::colored([0.0; 3], Color::white()); 3];
        buf.upload(&verts, PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        buf.draw().unwrap();

        backend.shutdown();
        backend.shutdown();

        assert_eq!(buf.draw(), Err(BackendError::DeviceUnavailable));
        assert_eq!(backend.active_features(), BackendFeatures::empty());
        assert!(backend.create_geometry_buffer().is_err());
    }

    #[test]
    fn shutdown_releases_shared_layout() {
        let mut backend = backend();
        let mut buf = backend.create_geometry_buffer().unwrap();
        buf.upload(&[Vertex::default(); 2], PrimitiveType::Lines, BufferUsageHint::Static).unwrap();
        buf.draw().unwrap();
        assert_eq!(backend.with_device("test", |d| d.live_layout_count()).unwrap(), 1);

        let ctx = backend.context.clone().unwrap();
        backend.shutdown();

        assert!(!ctx.borrow().has_vertex_layout());
        assert_eq!(ctx.borrow().device().live_layout_count(), 0);
    }

    // ── state ─────────────────────────────────────────────────────────────

    #[test]
    fn viewport_truncates() {
        let mut backend = backend();
        backend.set_viewport(Vec2::new(10.7, 20.2), Vec2::new(300.9, 200.5)).unwrap();

        let vp = backend.with_device("test", |d| d.viewport()).unwrap();
        assert_eq!((vp.x, vp.y, vp.width, vp.height), (10, 20, 300, 200));
        assert_eq!((vp.min_z, vp.max_z), (0.0, 1.0));
    }

    #[test]
    fn scissor_sets_rect_and_enables_test() {
        let mut backend = backend();
        backend.set_scissor(Vec2::new(5.0, 6.0), Vec2::new(10.0, 20.0)).unwrap();

        assert_eq!(
            calls(&backend),
            vec![
                DeviceCall::SetScissorRect(ScissorRect::new(5, 6, 15, 26)),
                DeviceCall::SetRenderState { state: RenderState::ScissorTest, enabled: true },
            ]
        );
        assert!(backend.active_features().contains(BackendFeatures::SCISSOR_TEST));
    }

    #[test]
    fn clear_passes_color() {
        let mut backend = backend();
        let color = Color::new(10, 20, 30, 40);
        backend.clear(color).unwrap();

        assert_eq!(backend.with_device("test", |d| d.clear_color()).unwrap(), Some(color));
    }

    // ── features ──────────────────────────────────────────────────────────

    #[test]
    fn enable_turns_on_device_state() {
        let mut backend = backend();
        backend
            .enable_features(BackendFeatures::SCISSOR_TEST | BackendFeatures::ALPHA_BLENDING)
            .unwrap();

        assert_eq!(backend.active_features(), BackendFeatures::all());
        let (scissor, blend) = backend
            .with_device("test", |d| {
                (d.render_state(RenderState::ScissorTest), d.render_state(RenderState::AlphaBlend))
            })
            .unwrap();
        assert!(scissor && blend);
    }

    #[test]
    fn disable_only_touches_active_features() {
        let mut backend = backend();
        backend.enable_features(BackendFeatures::ALPHA_BLENDING).unwrap();
        calls(&backend);

        backend.disable_features(BackendFeatures::all()).unwrap();

        assert_eq!(
            calls(&backend),
            vec![DeviceCall::SetRenderState { state: RenderState::AlphaBlend, enabled: false }]
        );
        assert_eq!(backend.active_features(), BackendFeatures::empty());
    }

    #[test]
    fn disable_inactive_feature_is_silent() {
        let mut backend = backend();
        backend.disable_features(BackendFeatures::SCISSOR_TEST).unwrap();
        assert!(calls(&backend).is_empty());
    }

    // ── resources ─────────────────────────────────────────────────────────

    #[test]
    fn buffers_share_the_backend_device() {
        let backend = backend();
        let mut a = backend.create_geometry_buffer().unwrap();
        let mut b = backend.create_geometry_buffer().unwrap();
        a.upload(&[Vertex::default(); 3], PrimitiveType::Triangles, BufferUsageHint::Static).unwrap();
        b.upload(&[Vertex::default(); 1], PrimitiveType::Points, BufferUsageHint::Dynamic).unwrap();

        assert_eq!(backend.with_device("test", |d| d.live_buffer_count()).unwrap(), 2);
        drop(a);
        assert_eq!(backend.with_device("test", |d| d.live_buffer_count()).unwrap(), 1);
    }
}
