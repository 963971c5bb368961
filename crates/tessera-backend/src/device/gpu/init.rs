/// Initialization parameters for [`super::WgpuDevice`].
///
/// Add fields only when a concrete platform or adapter needs them.
#[derive(Debug, Clone)]
pub struct WgpuInit {
    /// Offscreen render target size in pixels. Zero dimensions are raised to 1.
    pub target_size: (u32, u32),

    /// Adapter selection preference.
    pub power_preference: wgpu::PowerPreference,

    /// Request a software adapter. Useful on CI machines without a GPU.
    pub force_fallback_adapter: bool,

    /// Required wgpu features. The geometry pipeline needs none.
    pub required_features: wgpu::Features,

    /// Limits requested from the adapter/device.
    pub required_limits: wgpu::Limits,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            target_size: (640, 480),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        }
    }
}
