use std::cell::RefCell;
use std::rc::Rc;

use crate::geometry::VERTEX_ELEMENTS;

use super::{BackendError, GraphicsDevice, LayoutHandle};

/// Shared, single-threaded handle to a device context.
///
/// The backend holds the only strong reference; geometry buffers hold weak ones.
pub type SharedContext<D> = Rc<RefCell<DeviceContext<D>>>;

/// A device plus the resources shared by every buffer created on it.
///
/// The vertex layout for [`crate::geometry::Vertex`] is created on first use
/// and released exactly once by [`teardown`](Self::teardown) (or on drop).
pub struct DeviceContext<D: GraphicsDevice> {
    device: D,
    vertex_layout: Option<LayoutHandle>,
}

impl<D: GraphicsDevice> DeviceContext<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            vertex_layout: None,
        }
    }

    pub fn into_shared(self) -> SharedContext<D> {
        Rc::new(RefCell::new(self))
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Returns the shared vertex layout, registering it on first call.
    pub fn vertex_layout(&mut self) -> Result<LayoutHandle, BackendError> {
        if let Some(layout) = self.vertex_layout {
            return Ok(layout);
        }

        let layout = self
            .device
            .create_vertex_layout(&VERTEX_ELEMENTS)
            .inspect_err(|err| log::error!("DeviceContext: failed to create vertex layout: {err}"))?;

        log::debug!("DeviceContext: vertex layout {} registered", layout.raw());
        self.vertex_layout = Some(layout);
        Ok(layout)
    }

    /// Whether the shared vertex layout currently exists.
    pub fn has_vertex_layout(&self) -> bool {
        self.vertex_layout.is_some()
    }

    /// Releases shared resources. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(layout) = self.vertex_layout.take() {
            self.device.release_vertex_layout(layout);
            log::debug!("DeviceContext: vertex layout {} released", layout.raw());
        }
    }
}

impl<D: GraphicsDevice> Drop for DeviceContext<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
