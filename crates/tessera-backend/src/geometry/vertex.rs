use bytemuck::{Pod, Zeroable};

use crate::coords::Color;

/// Engine vertex record.
///
/// Field order and size are a contract with the device: the vertex layout
/// registered by [`VERTEX_ELEMENTS`] addresses fields by byte offset.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    /// Packed `0xAARRGGBB`.
    pub color: u32,
}

/// Size of one [`Vertex`] in bytes; also the vertex-source stride.
pub const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

const _: () = assert!(std::mem::size_of::<Vertex>() == 36);

impl Vertex {
    #[inline]
    pub const fn new(position: [f32; 3], uv: [f32; 2], normal: [f32; 3], color: Color) -> Self {
        Self {
            position,
            uv,
            normal,
            color: color.to_argb(),
        }
    }

    /// Position and color only; uv and normal are zero.
    #[inline]
    pub const fn colored(position: [f32; 3], color: Color) -> Self {
        Self::new(position, [0.0, 0.0], [0.0, 0.0, 0.0], color)
    }

    #[inline]
    pub const fn rgba(self) -> Color {
        Color::from_argb(self.color)
    }
}

/// Data type of one vertex element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float2,
    Float3,
    /// Four 8-bit channels packed as `0xAARRGGBB`.
    Color,
}

impl VertexFormat {
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Color => 4,
        }
    }
}

/// Semantic of one vertex element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VertexUsage {
    Position,
    TexCoord,
    Normal,
    Color,
}

/// One entry of a vertex layout declaration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub offset: u32,
    pub format: VertexFormat,
    pub usage: VertexUsage,
    pub usage_index: u8,
}

impl VertexElement {
    const fn new(offset: u32, format: VertexFormat, usage: VertexUsage) -> Self {
        Self {
            offset,
            format,
            usage,
            usage_index: 0,
        }
    }
}

/// Layout declaration matching [`Vertex`], registered once per device context.
pub const VERTEX_ELEMENTS: [VertexElement; 4] = [
    VertexElement::new(0, VertexFormat::Float3, VertexUsage::Position),
    VertexElement::new(12, VertexFormat::Float2, VertexUsage::TexCoord),
    VertexElement::new(20, VertexFormat::Float3, VertexUsage::Normal),
    VertexElement::new(32, VertexFormat::Color, VertexUsage::Color),
];
