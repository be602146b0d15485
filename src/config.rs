use std::path::PathBuf;
use std::time::Duration;

/// Start-up parameters for the renderer.
///
/// Values here are consumed once while the backend is brought up; the scene
/// itself is fixed and lives in [`crate::scene`].
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Backends considered during adapter selection.
    pub backends: wgpu::Backends,

    /// Adapter preferences tried in order. The first adapter that reports
    /// ray query support wins.
    pub power_preferences: Vec<wgpu::PowerPreference>,

    pub present_mode: wgpu::PresentMode,
    pub desired_maximum_frame_latency: u32,

    /// Upper bound for a single fence wait. A frame exceeding it is treated
    /// as a hung GPU.
    pub fence_timeout: Duration,

    /// Sleep between device polls while waiting on the fence.
    pub fence_poll_interval: Duration,

    /// Bound on primary + reflection + shadow ray chains.
    pub max_recursion_depth: u32,

    /// Size of the presentable target when no window surface exists.
    pub offscreen_size: (u32, u32),

    /// Directory all asset paths are resolved against.
    pub resource_root: PathBuf,

    /// Shader source relative to `resource_root`. `None` uses the shader
    /// compiled into the binary.
    pub shader_path: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::from_env().unwrap_or(wgpu::Backends::PRIMARY),
            power_preferences: vec![
                wgpu::PowerPreference::HighPerformance,
                wgpu::PowerPreference::LowPower,
                wgpu::PowerPreference::None,
            ],
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            fence_timeout: Duration::from_secs(5),
            fence_poll_interval: Duration::from_millis(1),
            max_recursion_depth: 10,
            offscreen_size: (1280, 720),
            resource_root: PathBuf::from("Resource"),
            shader_path: None,
        }
    }
}
