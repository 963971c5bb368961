//! Vertex layout → wgpu pipeline translation.

use crate::device::{BackendError, LayoutHandle};
use crate::geometry::{PrimitiveType, VertexElement, VertexFormat, VertexUsage};

/// Cache key for render pipelines; one pipeline per distinct draw setup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub layout: LayoutHandle,
    pub stride: u32,
    pub primitive: PrimitiveType,
    pub alpha_blend: bool,
}

/// Vertex strides and attribute offsets must be multiples of this.
const STRIDE_ALIGNMENT: u32 = 4;

/// Shader input slot and the only format the built-in shader accepts there.
const SLOTS: [(VertexUsage, VertexFormat, u32); 4] = [
    (VertexUsage::Position, VertexFormat::Float3, 0),
    (VertexUsage::TexCoord, VertexFormat::Float2, 1),
    (VertexUsage::Normal, VertexFormat::Float3, 2),
    (VertexUsage::Color, VertexFormat::Color, 3),
];

pub(super) fn topology(primitive: PrimitiveType) -> wgpu::PrimitiveTopology {
    match primitive {
        PrimitiveType::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveType::Lines => wgpu::PrimitiveTopology::LineList,
        PrimitiveType::Points => wgpu::PrimitiveTopology::PointList,
    }
}

pub(super) fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Color => wgpu::VertexFormat::Unorm8x4,
    }
}

/// Checks that `elements` feed every input of the built-in shader exactly once.
pub(super) fn validate_layout(elements: &[VertexElement]) -> Result<(), BackendError> {
    for (usage, format, _) in SLOTS {
        let matching: Vec<&VertexElement> = elements
            .iter()
            .filter(|e| e.usage == usage && e.usage_index == 0)
            .collect();

        match matching.as_slice() {
            [e] if e.format == format => {}
            [e] => {
                return Err(BackendError::LayoutFailed(format!(
                    "{usage:?} must be {format:?}, got {:?}",
                    e.format
                )));
            }
            [] => return Err(BackendError::LayoutFailed(format!("missing {usage:?} element"))),
            _ => return Err(BackendError::LayoutFailed(format!("duplicate {usage:?} element"))),
        }
    }

    if let Some(extra) = elements.iter().find(|e| e.usage_index != 0) {
        return Err(BackendError::LayoutFailed(format!(
            "{:?}{} has no shader input",
            extra.usage, extra.usage_index
        )));
    }
    Ok(())
}

/// Builds wgpu attributes for a validated layout, or fails when an element
/// does not fit in `stride`.
pub(super) fn attributes(
    elements: &[VertexElement],
    stride: u32,
) -> Result<Vec<wgpu::VertexAttribute>, BackendError> {
    if stride == 0 || stride % STRIDE_ALIGNMENT != 0 {
        return Err(BackendError::DrawFailed(format!("vertex stride {stride} is not 4-byte aligned")));
    }

    elements
        .iter()
        .map(|e| {
            if e.offset + e.format.size() > stride {
                return Err(BackendError::DrawFailed(format!(
                    "{:?} at offset {} overruns stride {stride}",
                    e.usage, e.offset
                )));
            }
            let location = SLOTS
                .iter()
                .find(|(usage, _, _)| *usage == e.usage)
                .map(|&(_, _, location)| location)
                .ok_or_else(|| BackendError::DrawFailed(format!("{:?} has no shader input", e.usage)))?;

            Ok(wgpu::VertexAttribute {
                format: vertex_format(e.format),
                offset: e.offset as u64,
                shader_location: location,
            })
        })
        .collect()
}

pub(super) fn create_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    attributes: &[wgpu::VertexAttribute],
    key: PipelineKey,
) -> wgpu::RenderPipeline {
    let vertex_layout = wgpu::VertexBufferLayout {
        array_stride: key.stride as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    };

    let blend = key.alpha_blend.then_some(wgpu::BlendState::ALPHA_BLENDING);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("tessera geometry pipeline"),
        layout: Some(layout),

        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[vertex_layout],
        },

        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: super::TARGET_FORMAT,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),

        primitive: wgpu::PrimitiveState {
            topology: topology(key.primitive),
            strip_index_format: None,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },

        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}
