//! Native device boundary and its implementations.

mod context;
mod error;
mod headless;
mod traits;

pub mod gpu;

pub use context::{DeviceContext, SharedContext};
pub use error::BackendError;
pub use headless::{DeviceCall, HeadlessDevice, DISCARD_FILL};
pub use traits::{
    BufferFlags, BufferHandle, GraphicsDevice, LayoutHandle, RenderState, VertexSource,
};
