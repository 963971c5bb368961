//! Engine-level coordinates and the device-space values derived from them.
//!
//! The engine hands the backend floating-point pixel positions (top-left
//! origin, +Y down); devices take whole-pixel viewports and scissor edges.
//! Conversions truncate toward zero.

mod color;
mod scissor;
mod vec2;
mod viewport;

pub use color::Color;
pub use scissor::ScissorRect;
pub use vec2::Vec2;
pub use viewport::Viewport;
