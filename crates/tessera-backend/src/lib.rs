//! Tessera geometry backend.
//!
//! Maps the engine's rendering interface onto an immediate-mode device model:
//! growable [`geometry::GeometryBuffer`]s over fixed-size lockable device
//! memory, a [`backend::Backend`] translating engine state into device calls,
//! and two [`device::GraphicsDevice`] implementations (a recording CPU device
//! and a wgpu device).

pub mod backend;
pub mod coords;
pub mod device;
pub mod geometry;
pub mod logging;

pub use backend::{Backend, BackendFeatures};
pub use device::BackendError;
