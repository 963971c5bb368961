//! wgpu-backed device.
//!
//! Geometry is rasterized into an offscreen target with a single built-in
//! pipeline per vertex layout, stride, topology and blend mode. Buffer locks
//! are staged on the CPU: write locks upload on unlock, read locks copy back
//! through a staging buffer.

mod device;
mod init;
mod pipeline;
mod readback;

pub use device::WgpuDevice;
pub use init::WgpuInit;

/// Format of the offscreen render target.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
