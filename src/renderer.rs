use crate::accel::{self, BottomLevel, InstanceDesc, TopLevel};
use crate::binding::{BindingResources, DescriptorHeap};
use crate::commands::CommandList;
use crate::config::RendererConfig;
use crate::error::{RendererError, Result};
use crate::fence::{CancelToken, Fence};
use crate::geometry::CombinedMeshes;
use crate::pipeline::{RayTracingPipeline, ShaderTable};
use crate::resources::{GpuBuffer, GpuTexture, ResourceManager, ResourceState};
use crate::scene::SceneInput;
use crate::wgpu_ctx::GpuContext;

/// The ray-tracing backend: every GPU object the frame dispatch touches.
///
/// Fields drop in declaration order. Bindings go first, then the pipeline,
/// the acceleration structures and the buffers they were built from; the
/// synchronization objects and the device go last. [`Drop`] waits for the
/// GPU to go idle before any of it is released.
pub struct Renderer {
    pub(crate) heap: DescriptorHeap,
    pub(crate) ray_target: GpuTexture,
    pub(crate) shader_table: ShaderTable,
    pub(crate) pipeline: RayTracingPipeline,
    pub(crate) sampler: wgpu::Sampler,
    pub(crate) normal_map: GpuTexture,
    pub(crate) albedo: GpuTexture,
    pub(crate) scene_constants: GpuBuffer,
    pub(crate) top_level: TopLevel,
    pub(crate) bottom_level: BottomLevel,
    pub(crate) materials: GpuBuffer,
    pub(crate) geometry_descs: GpuBuffer,
    pub(crate) indices: GpuBuffer,
    pub(crate) vertices: GpuBuffer,
    pub(crate) cancel: CancelToken,
    pub(crate) fence: Fence,
    pub(crate) commands: CommandList,
    pub(crate) ctx: GpuContext,
}

impl Renderer {
    /// Brings the backend up in dependency order: command list and fence,
    /// geometry buffers, acceleration structures, textures, pipeline and
    /// shader table, then the descriptor heap. Any failure aborts start-up.
    pub fn new(
        ctx: GpuContext,
        config: &RendererConfig,
        scene: &SceneInput,
        shader_source: &str,
    ) -> Result<Self> {
        if scene.instance_constants.len() != scene.meshes.len() {
            return Err(RendererError::ShaderTable(format!(
                "{} instance constants for {} meshes",
                scene.instance_constants.len(),
                scene.meshes.len()
            )));
        }
        if let Some((i, mesh)) = scene
            .meshes
            .iter()
            .enumerate()
            .find(|(_, m)| m.material as usize >= scene.materials.len())
        {
            return Err(RendererError::Binding(format!(
                "mesh {i} uses material {} of {}",
                mesh.material,
                scene.materials.len()
            )));
        }

        let mut commands = CommandList::new("frame commands");
        let mut fence = Fence::new(config.fence_timeout, config.fence_poll_interval);
        let cancel = CancelToken::new();
        let (width, height) = target_size(&ctx, config);

        // the shared buffers are complete before any structure is built
        let combined = CombinedMeshes::from_meshes(&scene.meshes);
        let geometry_usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::BLAS_INPUT;

        let mut resources = ResourceManager::new(&ctx, &mut commands, &mut fence, cancel.clone());
        let vertices = resources.upload_buffer("vertex buffer", &combined.vertices, geometry_usage);
        let indices = resources.upload_buffer("index buffer", &combined.indices, geometry_usage);
        let geometry_descs = resources.upload_buffer(
            "geometry descriptors",
            &combined.descs,
            wgpu::BufferUsages::STORAGE,
        );
        let materials = resources.upload_buffer(
            "materials",
            &scene.materials,
            wgpu::BufferUsages::STORAGE,
        );

        let bottom_level =
            accel::build_bottom_level(&mut resources, &combined.descs, &vertices, &indices)?;
        let top_level =
            accel::build_top_level(&mut resources, &[&bottom_level], &[InstanceDesc::identity(0)])?;

        let scene_constants =
            resources.create_uniform("scene constants", &scene.state.constants(width, height));
        let albedo = resources.upload_texture(
            "albedo texture",
            &scene.albedo.pixels,
            scene.albedo.width,
            scene.albedo.height,
        )?;
        let normal_map = resources.upload_texture(
            "normal map",
            &scene.normal_map.pixels,
            scene.normal_map.width,
            scene.normal_map.height,
        )?;
        let sampler = ctx.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let pipeline = RayTracingPipeline::assemble(
            &ctx.device,
            shader_source,
            ctx.target_format(),
            config.max_recursion_depth,
        )?;
        let shader_table = ShaderTable::build(&resources, pipeline.desc(), &scene.instance_constants)?;
        let ray_target = create_ray_target(&resources, width, height);
        drop(resources);

        let heap = DescriptorHeap::populate(
            &ctx.device,
            &pipeline.root.bind_group_layouts,
            &BindingResources {
                output: &ray_target.view,
                tlas: &top_level.tlas,
                scene_constants: &scene_constants.buffer,
                shader_table: &shader_table.buffer.buffer,
                indices: &indices.buffer,
                vertices: &vertices.buffer,
                geometry_descs: &geometry_descs.buffer,
                materials: &materials.buffer,
                albedo: &albedo.view,
                normal_map: &normal_map.view,
                sampler: &sampler,
            },
        )?;

        log::info!(
            "renderer ready on {}: {} geometries, {}x{} {:?}, fence at {}",
            ctx.adapter_name(),
            bottom_level.geometry_count,
            width,
            height,
            ctx.target_format(),
            fence.last_signaled()
        );

        Ok(Self {
            heap,
            ray_target,
            shader_table,
            pipeline,
            sampler,
            normal_map,
            albedo,
            scene_constants,
            top_level,
            bottom_level,
            materials,
            geometry_descs,
            indices,
            vertices,
            cancel,
            fence,
            commands,
            ctx,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Token that aborts the fence wait in progress or the next one.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn geometry_count(&self) -> u32 {
        self.bottom_level.geometry_count
    }

    pub fn instance_count(&self) -> u32 {
        self.top_level.instance_count
    }

    pub fn shader_table(&self) -> &ShaderTable {
        &self.shader_table
    }

    /// Size of the ray target, which always matches the back buffer.
    pub fn target_size(&self) -> (u32, u32) {
        (self.ray_target.width, self.ray_target.height)
    }

    /// Resource manager over the backend's command list and fence.
    pub fn resources(&mut self) -> ResourceManager<'_> {
        ResourceManager::new(
            &self.ctx,
            &mut self.commands,
            &mut self.fence,
            self.cancel.clone(),
        )
    }

    /// Reconfigures the surface and recreates the ray target plus the
    /// bindings that reference it. Returns `false` when nothing changed:
    /// a zero or unchanged size, or a surface that refused the new one.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool> {
        if width == 0 || height == 0 || (width, height) == self.target_size() {
            return Ok(false);
        }
        // the old target may still be in flight
        self.fence.wait_idle(&self.ctx.device, &self.cancel)?;
        if self.ctx.surface.is_some() && !self.ctx.resize(width, height) {
            return Ok(false);
        }
        self.recreate_target(width, height)?;
        log::info!("resized ray target to {width}x{height}");
        Ok(true)
    }

    fn recreate_target(&mut self, width: u32, height: u32) -> Result<()> {
        let resources = ResourceManager::new(
            &self.ctx,
            &mut self.commands,
            &mut self.fence,
            self.cancel.clone(),
        );
        let ray_target = create_ray_target(&resources, width, height);
        drop(resources);

        self.heap = DescriptorHeap::populate(
            &self.ctx.device,
            &self.pipeline.root.bind_group_layouts,
            &BindingResources {
                output: &ray_target.view,
                tlas: &self.top_level.tlas,
                scene_constants: &self.scene_constants.buffer,
                shader_table: &self.shader_table.buffer.buffer,
                indices: &self.indices.buffer,
                vertices: &self.vertices.buffer,
                geometry_descs: &self.geometry_descs.buffer,
                materials: &self.materials.buffer,
                albedo: &self.albedo.view,
                normal_map: &self.normal_map.view,
                sampler: &self.sampler,
            },
        )?;
        self.ray_target = ray_target;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // a cancelled frame must not skip the idle wait
        if let Err(e) = self.fence.wait_idle(&self.ctx.device, &CancelToken::new()) {
            log::error!("GPU did not go idle before teardown: {e}");
        }
        log::debug!("renderer shut down at fence {}", self.fence.completed_value());
    }
}

fn target_size(ctx: &GpuContext, config: &RendererConfig) -> (u32, u32) {
    match &ctx.surface {
        Some(s) => (s.config.width.max(1), s.config.height.max(1)),
        None => (config.offscreen_size.0.max(1), config.offscreen_size.1.max(1)),
    }
}

/// Output of the ray dispatch. It rests in `CopySource` between frames.
fn create_ray_target(resources: &ResourceManager<'_>, width: u32, height: u32) -> GpuTexture {
    resources.create_texture(
        "ray target",
        width,
        height,
        resources.context().target_format(),
        wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        ResourceState::CopySource,
    )
}
