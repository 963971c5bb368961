use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::coords::{Color, ScissorRect, Viewport};
use crate::device::{
    BackendError, BufferFlags, BufferHandle, GraphicsDevice, LayoutHandle, RenderState,
    VertexSource,
};
use crate::geometry::{PrimitiveType, VertexElement};

use super::init::WgpuInit;
use super::pipeline::{self, PipelineKey};
use super::readback;
use super::TARGET_FORMAT;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LockMode {
    Write,
    Read,
}

/// CPU-side view handed out while a buffer is locked.
struct BufferLock {
    mode: LockMode,
    offset: u64,
    staging: Vec<u8>,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    /// Size requested by the caller; the allocation is rounded up to 4 bytes.
    size: u64,
    flags: BufferFlags,
    lock: Option<BufferLock>,
}

/// Bound state consumed by the next draw.
#[derive(Debug, Default)]
struct DrawState {
    layout: Option<LayoutHandle>,
    source: Option<VertexSource>,
    /// `None` covers the whole target.
    viewport: Option<Viewport>,
    scissor: ScissorRect,
    scissor_test: bool,
    alpha_blend: bool,
}

/// [`GraphicsDevice`] over wgpu, rendering into an offscreen `Rgba8Unorm` target.
///
/// Draws and clears are recorded into a single command encoder that is
/// submitted by [`flush`](Self::flush), before any buffer write becomes
/// visible, and before any readback.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,

    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    target_size: (u32, u32),

    shader: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    next_id: u64,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    layouts: HashMap<LayoutHandle, Vec<VertexElement>>,

    state: DrawState,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuDevice {
    /// Creates a device without a surface.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn headless(init: WgpuInit) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: init.force_fallback_adapter,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        log::info!("WgpuDevice: adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("tessera device"),
                required_features: init.required_features,
                required_limits: init.required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        Ok(Self::from_parts(device, queue, init.target_size))
    }

    /// Wraps an existing device/queue pair.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, target_size: (u32, u32)) -> Self {
        let target_size = (target_size.0.max(1), target_size.1.max(1));

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("tessera render target"),
            size: wgpu::Extent3d {
                width: target_size.0,
                height: target_size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("tessera geometry shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/geometry.wgsl").into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tessera geometry pipeline layout"),
            bind_group_layouts: &[],
            immediate_size: 0,
        });

        Self {
            device,
            queue,
            target,
            target_view,
            target_size,
            shader,
            pipeline_layout,
            pipelines: HashMap::new(),
            next_id: 1,
            buffers: HashMap::new(),
            layouts: HashMap::new(),
            state: DrawState::default(),
            encoder: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    /// Submits recorded draws and clears.
    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    /// Flushes and copies the render target into tightly packed RGBA8 rows.
    pub fn read_target_rgba8(&mut self) -> Result<Vec<u8>, BackendError> {
        self.flush();
        let (width, height) = self.target_size;
        readback::read_texture_rgba8(&self.device, &self.queue, &self.target, width, height)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn lockable(&mut self, buffer: BufferHandle, offset: u64, size: u64) -> Result<&mut GpuBuffer, BackendError> {
        let gpu = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| BackendError::LockFailed(format!("unknown buffer {}", buffer.0)))?;
        if gpu.lock.is_some() {
            return Err(BackendError::LockFailed(format!("buffer {} is already locked", buffer.0)));
        }
        if offset.checked_add(size).is_none_or(|end| end > gpu.size) {
            return Err(BackendError::LockFailed(format!(
                "range {offset}+{size} exceeds buffer of {} bytes",
                gpu.size
            )));
        }
        Ok(gpu)
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> Result<(), BackendError> {
        if self.pipelines.contains_key(&key) {
            return Ok(());
        }

        let elements = self
            .layouts
            .get(&key.layout)
            .ok_or_else(|| BackendError::DrawFailed(format!("vertex layout {} released", key.layout.0)))?;
        let attributes = pipeline::attributes(elements, key.stride)?;

        let created =
            pipeline::create_pipeline(&self.device, &self.shader, &self.pipeline_layout, &attributes, key);
        log::debug!("WgpuDevice: pipeline created for {key:?}");
        self.pipelines.insert(key, created);
        Ok(())
    }
}

/// Pixel-space viewport clamped to the target, or `None` when nothing is visible.
fn clamp_viewport(viewport: Option<Viewport>, (tw, th): (u32, u32)) -> Option<[f32; 6]> {
    let Some(vp) = viewport else {
        return Some([0.0, 0.0, tw as f32, th as f32, 0.0, 1.0]);
    };
    if vp.is_empty() || vp.x >= tw || vp.y >= th {
        return None;
    }
    let w = vp.width.min(tw - vp.x);
    let h = vp.height.min(th - vp.y);
    if w == 0 || h == 0 {
        return None;
    }
    Some([vp.x as f32, vp.y as f32, w as f32, h as f32, vp.min_z, vp.max_z])
}

impl GraphicsDevice for WgpuDevice {
    const NAME: &'static str = "wgpu";
    const IDENTIFIER: &'static str = "wgpu";

    fn create_buffer(&mut self, size_bytes: u64, flags: BufferFlags) -> Result<BufferHandle, BackendError> {
        let max = self.device.limits().max_buffer_size;
        if size_bytes == 0 || size_bytes > max {
            return Err(BackendError::AllocationFailed {
                size: size_bytes,
                reason: format!("size must be within 1..={max} bytes"),
            });
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessera vertex buffer"),
            size: readback::align_up(size_bytes, wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let handle = BufferHandle(self.next_id());
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                size: size_bytes,
                flags,
                lock: None,
            },
        );
        log::trace!("WgpuDevice: buffer {} created ({size_bytes} bytes, {flags:?})", handle.0);
        Ok(handle)
    }

    fn lock_for_write(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<&mut [u8], BackendError> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(BackendError::LockFailed(format!("write offset {offset} is not 4-byte aligned")));
        }

        let gpu = self.lockable(buffer, offset, size)?;
        let lock = gpu.lock.insert(BufferLock {
            mode: LockMode::Write,
            offset,
            staging: vec![0; size as usize],
        });
        Ok(lock.staging.as_mut_slice())
    }

    fn lock_for_read(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<&[u8], BackendError> {
        if self.lockable(buffer, offset, size)?.flags.contains(BufferFlags::WRITE_ONLY) {
            log::debug!("WgpuDevice: reading back write-only buffer {}", buffer.0);
        }
        self.flush();

        let gpu = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| BackendError::LockFailed(format!("unknown buffer {}", buffer.0)))?;
        let bytes = readback::read_buffer_range(&self.device, &self.queue, &gpu.buffer, offset, size)?;
        let lock = gpu.lock.insert(BufferLock {
            mode: LockMode::Read,
            offset,
            staging: bytes,
        });
        Ok(lock.staging.as_slice())
    }

    fn unlock(&mut self, buffer: BufferHandle) {
        let Some(lock) = self.buffers.get_mut(&buffer).and_then(|gpu| gpu.lock.take()) else {
            log::warn!("WgpuDevice: unlock of unlocked or unknown buffer {}", buffer.0);
            return;
        };
        if lock.mode == LockMode::Read {
            return;
        }

        // Draws recorded before the lock must see the previous contents.
        self.flush();

        let mut data = lock.staging;
        data.resize(readback::align_up(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize, 0);
        if let Some(gpu) = self.buffers.get(&buffer)
            && !data.is_empty()
        {
            self.queue.write_buffer(&gpu.buffer, lock.offset, &data);
        }
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer).is_none() {
            log::warn!("WgpuDevice: release of unknown buffer {}", buffer.0);
        }
        if self.state.source.is_some_and(|s| s.buffer == buffer) {
            self.state.source = None;
        }
    }

    fn create_vertex_layout(&mut self, elements: &[VertexElement]) -> Result<LayoutHandle, BackendError> {
        pipeline::validate_layout(elements)?;

        let handle = LayoutHandle(self.next_id());
        self.layouts.insert(handle, elements.to_vec());
        Ok(handle)
    }

    fn release_vertex_layout(&mut self, layout: LayoutHandle) {
        if self.layouts.remove(&layout).is_none() {
            log::warn!("WgpuDevice: release of unknown layout {}", layout.0);
        }
        self.pipelines.retain(|key, _| key.layout != layout);
        if self.state.layout == Some(layout) {
            self.state.layout = None;
        }
    }

    fn set_vertex_layout(&mut self, layout: LayoutHandle) {
        self.state.layout = Some(layout);
    }

    fn set_vertex_source(&mut self, source: Option<VertexSource>) {
        self.state.source = source;
    }

    fn draw(
        &mut self,
        primitive: PrimitiveType,
        start_vertex: u32,
        primitive_count: u32,
    ) -> Result<(), BackendError> {
        let layout = self
            .state
            .layout
            .filter(|l| self.layouts.contains_key(l))
            .ok_or_else(|| BackendError::DrawFailed("no vertex layout bound".into()))?;
        let source = self
            .state
            .source
            .ok_or_else(|| BackendError::DrawFailed("no vertex source bound".into()))?;

        let gpu = self
            .buffers
            .get(&source.buffer)
            .ok_or_else(|| BackendError::DrawFailed(format!("vertex source {} released", source.buffer.0)))?;
        if gpu.lock.is_some() {
            return Err(BackendError::DrawFailed(format!("vertex source {} is locked", source.buffer.0)));
        }

        let vertex_count = primitive_count as u64 * primitive.vertices_per_primitive() as u64;
        let end_vertex = start_vertex as u64 + vertex_count;
        let needed = end_vertex * source.stride as u64;
        if needed > gpu.size || end_vertex > u32::MAX as u64 {
            return Err(BackendError::DrawFailed(format!(
                "draw reads {needed} bytes from a {} byte buffer",
                gpu.size
            )));
        }
        if vertex_count == 0 {
            return Ok(());
        }

        let key = PipelineKey {
            layout,
            stride: source.stride,
            primitive,
            alpha_blend: self.state.alpha_blend,
        };
        self.ensure_pipeline(key)?;

        let Some([x, y, w, h, min_z, max_z]) = clamp_viewport(self.state.viewport, self.target_size) else {
            log::trace!("WgpuDevice: draw skipped, viewport outside target");
            return Ok(());
        };
        let scissor = if self.state.scissor_test {
            match self.state.scissor.clamped_to(self.target_size.0, self.target_size.1) {
                Some(rect) => Some(rect),
                None => {
                    log::trace!("WgpuDevice: draw skipped, empty scissor");
                    return Ok(());
                }
            }
        } else {
            None
        };

        let (Some(pipeline), Some(gpu)) = (self.pipelines.get(&key), self.buffers.get(&source.buffer)) else {
            return Err(BackendError::DrawFailed("draw resources vanished".into()));
        };

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tessera frame encoder"),
            })
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("tessera draw"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        pass.set_pipeline(pipeline);
        pass.set_viewport(x, y, w, h, min_z, max_z);
        if let Some((sx, sy, sw, sh)) = scissor {
            pass.set_scissor_rect(sx, sy, sw, sh);
        }
        pass.set_vertex_buffer(0, gpu.buffer.slice(..));
        pass.draw(start_vertex..end_vertex as u32, 0..1);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), BackendError> {
        if !(0.0..=1.0).contains(&viewport.min_z)
            || !(0.0..=1.0).contains(&viewport.max_z)
            || viewport.min_z > viewport.max_z
        {
            return Err(BackendError::StateFailed(format!(
                "depth range {}..{} outside 0..1",
                viewport.min_z, viewport.max_z
            )));
        }
        self.state.viewport = Some(viewport);
        Ok(())
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) -> Result<(), BackendError> {
        self.state.scissor = rect;
        Ok(())
    }

    fn set_render_state(&mut self, state: RenderState, enabled: bool) -> Result<(), BackendError> {
        match state {
            RenderState::ScissorTest => self.state.scissor_test = enabled,
            RenderState::AlphaBlend => self.state.alpha_blend = enabled,
        }
        Ok(())
    }

    fn clear(&mut self, color: Color) -> Result<(), BackendError> {
        let [r, g, b, a] = color.to_unorm();

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tessera frame encoder"),
            })
        });

        let _rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("tessera clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        Ok(())
    }
}

impl Drop for WgpuDevice {
    fn drop(&mut self) {
        self.flush();
    }
}
