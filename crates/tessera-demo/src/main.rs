use anyhow::{Context, Result};

use tessera_backend::coords::{Color, Vec2};
use tessera_backend::device::gpu::{WgpuDevice, WgpuInit};
use tessera_backend::device::{GraphicsDevice, HeadlessDevice};
use tessera_backend::geometry::{BufferUsageHint, PrimitiveType, Vertex};
use tessera_backend::logging::{init_logging, LoggingConfig};
use tessera_backend::{Backend, BackendFeatures};

const TARGET_SIZE: (u32, u32) = (320, 240);

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let init = WgpuInit {
        target_size: TARGET_SIZE,
        ..Default::default()
    };

    match pollster::block_on(WgpuDevice::headless(init)) {
        Ok(device) => {
            let mut backend = Backend::new(device);
            run(&mut backend)?;

            let pixels = backend.with_device("read target", |d| d.read_target_rgba8())??;
            let (w, h) = TARGET_SIZE;
            let center = ((h / 2 * w + w / 2) * 4) as usize;
            log::info!("demo: center pixel {:?}", &pixels[center..center + 4]);

            backend.shutdown();
        }
        Err(err) => {
            log::warn!("demo: no wgpu adapter ({err:#}), using the headless device");
            let mut backend = Backend::new(HeadlessDevice::new());
            run(&mut backend)?;

            let draws = backend.with_device("inspect", |d| d.draw_calls())?;
            log::info!("demo: {} draw calls recorded: {draws:?}", draws.len());

            backend.shutdown();
        }
    }

    Ok(())
}

/// Drives one frame: state setup, a triangle fan of quads, an outline, and a
/// readback of the reused buffer.
fn run<D: GraphicsDevice>(backend: &mut Backend<D>) -> Result<()> {
    backend.initialize().context("backend initialization failed")?;
    log::info!("demo: running on {} ({})", backend.name(), backend.identifier());

    let (w, h) = (TARGET_SIZE.0 as f32, TARGET_SIZE.1 as f32);
    backend.set_viewport(Vec2::zero(), Vec2::new(w, h))?;
    backend.enable_features(BackendFeatures::ALPHA_BLENDING)?;
    backend.clear(Color::opaque(24, 24, 32))?;

    let mut quads = backend.create_geometry_buffer()?;
    let mut outline = backend.create_geometry_buffer()?;

    // Two quads as triangles; the second upload grows the buffer.
    let first = quad([-0.8, -0.8], [0.0, 0.0], Color::opaque(220, 60, 60));
    quads.upload(&first, PrimitiveType::Triangles, BufferUsageHint::Dynamic)?;
    quads.draw()?;

    let mut both = first.clone();
    both.extend(quad([0.0, 0.0], [0.8, 0.8], Color::new(60, 200, 90, 160)));
    quads.upload(&both, PrimitiveType::Triangles, BufferUsageHint::Dynamic)?;
    log::info!(
        "demo: {} vertices, capacity {}, {} triangles",
        quads.len(),
        quads.capacity(),
        quads.primitive_count()
    );

    backend.set_scissor(Vec2::new(w * 0.25, h * 0.25), Vec2::new(w * 0.5, h * 0.5))?;
    quads.draw()?;
    backend.disable_features(BackendFeatures::SCISSOR_TEST)?;

    let white = Color::white();
    let corners = [[-0.9, -0.9], [0.9, -0.9], [0.9, 0.9], [-0.9, 0.9]];
    let lines: Vec<Vertex> = (0..4)
        .flat_map(|i| {
            let [ax, ay] = corners[i];
            let [bx, by] = corners[(i + 1) % 4];
            [Vertex::colored([ax, ay, 0.0], white), Vertex::colored([bx, by, 0.0], white)]
        })
        .collect();
    outline.upload(&lines, PrimitiveType::Lines, BufferUsageHint::Static)?;
    outline.draw()?;

    // Shrinking reuses the allocation.
    quads.upload(&first, PrimitiveType::Triangles, BufferUsageHint::Dynamic)?;
    let read = quads.download()?;
    anyhow::ensure!(read == first, "readback does not match the uploaded vertices");
    log::info!("demo: readback of {} vertices matches (capacity {})", read.len(), quads.capacity());

    Ok(())
}

fn quad(min: [f32; 2], max: [f32; 2], color: Color) -> Vec<Vertex> {
    let [x0, y0] = min;
    let [x1, y1] = max;
    let v = |x, y| Vertex::colored([x, y, 0.0], color);
    vec![v(x0, y0), v(x1, y0), v(x1, y1), v(x0, y0), v(x1, y1), v(x0, y1)]
}
