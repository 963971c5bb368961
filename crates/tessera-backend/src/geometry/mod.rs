//! Engine vertex format and the device-backed geometry buffer.

mod buffer;
mod primitive;
mod vertex;

pub use buffer::GeometryBuffer;
pub use primitive::{primitive_count_raw, BufferUsageHint, PrimitiveType};
pub use vertex::{Vertex, VertexElement, VertexFormat, VertexUsage, VERTEX_ELEMENTS, VERTEX_STRIDE};
