//! Blocking GPU → CPU copies through MAP_READ staging buffers.

use crate::device::BackendError;

/// Rounds `value` up to a multiple of `align` (a power of two).
pub(super) fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Copy window satisfying `COPY_BUFFER_ALIGNMENT` that covers `offset..offset + size`.
///
/// Returns `(aligned_offset, aligned_size, skip)` where `skip` is the number of
/// leading bytes to drop from the staged copy.
pub(super) fn aligned_window(offset: u64, size: u64) -> (u64, u64, usize) {
    let start = offset & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
    let end = align_up(offset + size, wgpu::COPY_BUFFER_ALIGNMENT);
    (start, end - start, (offset - start) as usize)
}

/// Copies `offset..offset + size` of `source` into host memory.
///
/// `source` needs `COPY_SRC` and an allocation size that covers the aligned
/// window (buffers are created 4-byte aligned).
pub(super) fn read_buffer_range(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, BackendError> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let (start, staged, skip) = aligned_window(offset, size);
    if start + staged > source.size() {
        return Err(BackendError::LockFailed(format!(
            "read {offset}+{size} exceeds buffer of {} bytes",
            source.size()
        )));
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tessera readback staging"),
        size: staged,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("tessera readback encoder"),
    });
    encoder.copy_buffer_to_buffer(source, start, &staging, 0, staged);
    queue.submit(std::iter::once(encoder.finish()));

    let mut bytes = map_staging(device, &staging)?;
    bytes.drain(..skip);
    bytes.truncate(size as usize);
    Ok(bytes)
}

/// Copies an `Rgba8Unorm` texture into tightly packed rows.
pub(super) fn read_texture_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, BackendError> {
    let tight_row = width * 4;
    let padded_row = align_up(tight_row as u64, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64) as u32;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tessera target readback"),
        size: padded_row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("tessera target readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let padded = map_staging(device, &staging)?;
    let mut pixels = Vec::with_capacity((tight_row * height) as usize);
    for row in padded.chunks_exact(padded_row as usize) {
        pixels.extend_from_slice(&row[..tight_row as usize]);
    }
    Ok(pixels)
}

fn map_staging(device: &wgpu::Device, staging: &wgpu::Buffer) -> Result<Vec<u8>, BackendError> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|err| BackendError::LockFailed(format!("device poll failed: {err}")))?;

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(BackendError::LockFailed(format!("map failed: {err}"))),
        Err(_) => return Err(BackendError::LockFailed("map callback dropped".into())),
    }

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}
