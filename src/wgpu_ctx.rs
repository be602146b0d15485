use std::sync::Arc;

use crate::config::RendererConfig;
use crate::error::{RendererError, Result};

/// Required for ray query traversal in compute shaders.
pub const RAY_TRACING_FEATURES: wgpu::Features = wgpu::Features::EXPERIMENTAL_RAY_QUERY;

/// Window surface plus its active configuration.
pub struct SurfaceState {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

/// Owns the logical device and the adapter it was created from.
///
/// Fields drop top to bottom: the surface goes before the device, the
/// device before the adapter, and the instance last.
pub struct GpuContext {
    pub surface: Option<SurfaceState>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
    adapter_name: String,
    descriptor_increment: u32,
    _instance: wgpu::Instance,
}

impl GpuContext {
    /// Brings up a device without a presentation surface.
    pub async fn headless(config: &RendererConfig) -> Result<Self> {
        let instance = create_instance(config);
        let (adapter, device, queue) = create_device(&instance, config, None).await?;
        Ok(Self::assemble(instance, adapter, device, queue, None))
    }

    /// Brings up a device able to present into `window`.
    pub async fn with_window(
        window: Arc<winit::window::Window>,
        config: &RendererConfig,
    ) -> Result<Self> {
        let instance = create_instance(config);
        let surface = instance.create_surface(window.clone())?;
        let (adapter, device, queue) = create_device(&instance, config, Some(&surface)).await?;

        let size = window.inner_size();
        let surface_config = surface_configuration(&surface, &adapter, config, size.width, size.height)?;
        surface.configure(&device, &surface_config);
        log::info!(
            "surface configured: {:?} {}x{}",
            surface_config.format,
            surface_config.width,
            surface_config.height
        );

        let state = SurfaceState {
            surface,
            config: surface_config,
        };
        Ok(Self::assemble(instance, adapter, device, queue, Some(state)))
    }

    fn assemble(
        instance: wgpu::Instance,
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: Option<SurfaceState>,
    ) -> Self {
        let adapter_name = adapter.get_info().name;
        let descriptor_increment = device.limits().min_storage_buffer_offset_alignment;
        Self {
            surface,
            device,
            queue,
            adapter,
            adapter_name,
            descriptor_increment,
            _instance: instance,
        }
    }

    /// Human readable name of the selected adapter.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Offset granularity for bound buffer ranges on this device. Its only
    /// use is the shader table's section alignment; bind groups are not
    /// indexed by it.
    pub fn descriptor_increment(&self) -> u32 {
        self.descriptor_increment
    }

    /// Format written by the ray generation stage and copied to the back
    /// buffer.
    pub fn target_format(&self) -> wgpu::TextureFormat {
        match &self.surface {
            Some(s) => s.config.format,
            None => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let Some(state) = self.surface.as_mut() else {
            return false;
        };
        if width == 0 || height == 0 {
            return false;
        }
        state.config.width = width;
        state.config.height = height;
        state.surface.configure(&self.device, &state.config);
        true
    }

    /// Re-applies the current configuration after a lost or outdated surface.
    pub fn reconfigure(&self) {
        if let Some(state) = &self.surface {
            state.surface.configure(&self.device, &state.config);
        }
    }
}

pub fn supports_ray_tracing(adapter: &wgpu::Adapter) -> bool {
    adapter.features().contains(RAY_TRACING_FEATURES)
}

fn create_instance(config: &RendererConfig) -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: config.backends,
        flags: wgpu::InstanceFlags::from_env_or_default(),
        ..Default::default()
    })
}

/// Walks adapters in the configured preference order and returns the first
/// that reports ray query support and yields a device.
async fn create_device(
    instance: &wgpu::Instance,
    config: &RendererConfig,
    surface: Option<&wgpu::Surface<'static>>,
) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let mut last_error = None;

    for preference in &config.power_preferences {
        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: *preference,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
        {
            Ok(adapter) => adapter,
            Err(e) => {
                log::debug!("no adapter for {preference:?}: {e}");
                continue;
            }
        };

        let info = adapter.get_info();
        if !supports_ray_tracing(&adapter) {
            log::debug!(
                "skipping {} ({:?}): ray query unsupported",
                info.name,
                info.backend
            );
            continue;
        }

        let mut features = RAY_TRACING_FEATURES;
        if adapter
            .features()
            .contains(wgpu::Features::BGRA8UNORM_STORAGE)
        {
            features |= wgpu::Features::BGRA8UNORM_STORAGE;
        }

        let request = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("hwrt device"),
                required_features: features,
                required_limits: wgpu::Limits::default()
                    .using_minimum_supported_acceleration_structure_values(),
                experimental_features: unsafe { wgpu::ExperimentalFeatures::enabled() },
                ..Default::default()
            })
            .await;

        match request {
            Ok((device, queue)) => {
                log::info!("adapter: {} ({:?})", info.name, info.backend);
                log::info!("driver: {} {}", info.driver, info.driver_info);
                return Ok((adapter, device, queue));
            }
            Err(source) => {
                log::warn!("device creation failed on {}: {source}", info.name);
                last_error = Some(RendererError::RequestDevice {
                    adapter: info.name,
                    source,
                });
            }
        }
    }

    Err(last_error.unwrap_or(RendererError::NoRayTracingAdapter))
}

/// The back buffer must accept a texture copy and its format must be usable
/// as a storage texture, so the srgb suffix is stripped and BGRA is only
/// accepted when the device can write it from a shader.
fn surface_configuration(
    surface: &wgpu::Surface<'static>,
    adapter: &wgpu::Adapter,
    config: &RendererConfig,
    width: u32,
    height: u32,
) -> Result<wgpu::SurfaceConfiguration> {
    let caps = surface.get_capabilities(adapter);
    let name = adapter.get_info().name;

    if !caps.usages.contains(wgpu::TextureUsages::COPY_DST) {
        return Err(RendererError::SurfaceUnsupported(name));
    }

    let bgra_storage = adapter
        .features()
        .contains(wgpu::Features::BGRA8UNORM_STORAGE);
    let format = caps
        .formats
        .iter()
        .map(|f| f.remove_srgb_suffix())
        .find(|f| {
            *f == wgpu::TextureFormat::Rgba8Unorm
                || (*f == wgpu::TextureFormat::Bgra8Unorm && bgra_storage)
        })
        .ok_or_else(|| RendererError::SurfaceUnsupported(name.clone()))?;

    let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST;
    if caps.usages.contains(wgpu::TextureUsages::COPY_SRC) {
        usage |= wgpu::TextureUsages::COPY_SRC;
    }

    Ok(wgpu::SurfaceConfiguration {
        usage,
        format,
        width: width.max(1),
        height: height.max(1),
        present_mode: config.present_mode,
        alpha_mode: caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: config.desired_maximum_frame_latency,
    })
}
